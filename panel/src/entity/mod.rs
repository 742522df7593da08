pub mod column_option;
pub mod data_source;
