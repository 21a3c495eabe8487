pub mod auth;
pub mod backup;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod grades;
pub mod reports;
pub mod settings;
pub mod students;
pub mod subjects;
