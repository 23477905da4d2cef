pub mod backup;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod exercises;
pub mod progress;
pub mod setup;
pub mod students;
pub mod submissions;
