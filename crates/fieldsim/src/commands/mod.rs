pub mod config_cmd;
pub mod devices;
pub mod run;
