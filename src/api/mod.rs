pub mod health;
pub mod routes;
pub mod timing;
