use crate::backup::result_error::error::Error;
use crate::backup::result_error::{WithFnName, WithMsg};

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, R> WithFnName<S> for Result<R> {
    fn with_fn_name(self, fn_name: S) -> Self {
        self.map_err(|e| e.with_fn_name(fn_name))
    }
}

impl<R, S: Into<String>> WithMsg<S> for Result<R> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}

pub fn convert_error_vec(errors: Vec<Error>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_error_vec_empty_is_ok() {
        assert!(convert_error_vec(vec![]).is_ok());
    }

    #[test]
    fn test_convert_error_vec_keeps_every_error() {
        let res = convert_error_vec(vec![
            Error::NonZeroExit { code: Some(1) },
            Error::NonZeroExit { code: Some(2) },
        ]);
        match res {
            Err(Error::LotsOfError(errors)) => assert_eq!(errors.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    fn test_result_with_msg_only_touches_err() {
        let ok: Result<u8> = Ok(3);
        assert_eq!(ok.with_msg("unused").unwrap(), 3);

        let err: Result<u8> = Err(Error::NonZeroExit { code: None });
        let msg = err.with_msg("Sync failed").unwrap_err().to_string();
        assert!(msg.starts_with("Sync failed:"));
    }
}
