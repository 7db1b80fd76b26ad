pub mod cancel;
pub mod error;
pub mod grouping;
pub mod params;
pub mod table_reader;
pub mod table_writer;
pub mod types;
