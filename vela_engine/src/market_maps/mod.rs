pub mod factor_files;
pub mod map_files;
