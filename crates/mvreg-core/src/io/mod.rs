pub mod image_io;
pub mod import;
pub mod naming;
pub mod transform_file;

pub use image_io::{FileImageReader, ImageReader, RawImage};
pub use import::{import_directory, import_directory_with, ImportOptions, ImportReport};
pub use naming::{parse_name, NameParse};
pub use transform_file::{read_transform, write_transform};
