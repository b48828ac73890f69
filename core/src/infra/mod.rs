pub mod db;
pub mod event;
