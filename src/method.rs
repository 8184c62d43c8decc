use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::PreqError;

/// HTTP method token understood by [`crate::Preq`].
///
/// Methods are carried as lowercase tokens (`"get"`, `"mkcol"`, ...) and only
/// upper-cased when they reach the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Head,
    Put,
    Post,
    Delete,
    Trace,
    Options,
    Mkcol,
    Patch,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Head,
        Method::Put,
        Method::Post,
        Method::Delete,
        Method::Trace,
        Method::Options,
        Method::Mkcol,
        Method::Patch,
    ];

    /// Lowercase token for this method.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Head => "head",
            Method::Put => "put",
            Method::Post => "post",
            Method::Delete => "delete",
            Method::Trace => "trace",
            Method::Options => "options",
            Method::Mkcol => "mkcol",
            Method::Patch => "patch",
        }
    }

    /// GET and PUT get a retry by default.
    pub fn is_idempotent(self) -> bool {
        matches!(self, Method::Get | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = PreqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let token = value.trim();
        Method::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| PreqError::Options(format!("unsupported HTTP method '{token}'")))
    }
}

impl TryFrom<Method> for reqwest::Method {
    type Error = PreqError;

    /// Standard verbs map to their constants; `MKCOL` is an extension token
    /// and goes through the token parser.
    fn try_from(method: Method) -> Result<Self, Self::Error> {
        Ok(match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
            Method::Trace => reqwest::Method::TRACE,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Patch => reqwest::Method::PATCH,
            Method::Mkcol => reqwest::Method::from_bytes(b"MKCOL").map_err(|err| {
                PreqError::Options(format!("invalid extension method 'MKCOL': {err}"))
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Method;

    #[test]
    fn parses_tokens_case_insensitively() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("mkcol".parse::<Method>().unwrap(), Method::Mkcol);
        assert_eq!(" Patch ".parse::<Method>().unwrap(), Method::Patch);
        assert!("CONNECT".parse::<Method>().is_err());
    }

    #[test]
    fn only_get_and_put_are_idempotent() {
        let idempotent: Vec<_> = Method::ALL
            .into_iter()
            .filter(|method| method.is_idempotent())
            .collect();
        assert_eq!(idempotent, vec![Method::Get, Method::Put]);
    }

    #[test]
    fn mkcol_maps_to_extension_method() {
        let method = reqwest::Method::try_from(Method::Mkcol).unwrap();
        assert_eq!(method.as_str(), "MKCOL");
        assert_ne!(method, reqwest::Method::POST);
    }

    #[test]
    fn every_method_maps_to_its_uppercase_token() {
        for method in Method::ALL {
            let wire = reqwest::Method::try_from(method).unwrap();
            assert_eq!(wire.as_str(), method.as_str().to_ascii_uppercase());
        }
    }
}
