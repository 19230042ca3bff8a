pub mod entries;
pub mod init;
