pub mod publisher;
pub mod subjects;
