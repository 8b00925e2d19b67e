pub mod error;
pub mod result;

pub trait WithFnName<S: Into<String>> {
    fn with_fn_name(self, fn_name: S) -> Self;
}

pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}
