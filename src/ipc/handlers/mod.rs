pub mod assessments;
pub mod attendance;
pub mod auth;
pub mod classes;
pub mod co_teachers;
pub mod core;
pub mod dashboard;
pub mod notifications;
pub mod profiles;
pub mod resources;
pub mod students;
