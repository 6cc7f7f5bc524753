pub mod analytics;
pub mod auth;
pub mod companies;
pub mod health;
pub mod invitations;
pub mod members;
pub mod notifications;
pub mod quizzes;
pub mod transfer;
pub mod users;
