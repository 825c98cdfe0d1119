pub mod multipart;
pub mod uploads;
