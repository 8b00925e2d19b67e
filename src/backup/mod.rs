pub mod backup_config;
pub mod driver;
pub mod logging;
pub mod redacted;
pub mod result_error;
pub mod sync_runner;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
