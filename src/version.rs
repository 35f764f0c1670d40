/// Build version, overridable at compile time through `VIGIL_VERSION`.
pub const VERSION: &str = match option_env!("VIGIL_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
