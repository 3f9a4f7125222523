pub mod core;
pub mod grades;
pub mod grading_config;
pub mod reference;
pub mod reports;
