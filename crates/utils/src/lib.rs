//! Small helpers shared by the binspect crates.

pub mod error;

/// Splits a `/`-separated workspace path into its non-empty segments.
///
/// Leading, trailing and repeated separators are ignored, so `"/a//b/"`
/// yields `["a", "b"]`. Segments are returned verbatim; matching against
/// tree names is case-sensitive.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
	path.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn segments_skip_empty_parts() {
		let segments = path_segments("/dir1//dir2/file.txt/").collect::<Vec<_>>();
		assert_eq!(segments, ["dir1", "dir2", "file.txt"]);
	}

	#[test]
	fn empty_path_has_no_segments() {
		assert_eq!(path_segments("").count(), 0);
		assert_eq!(path_segments("///").count(), 0);
	}
}
