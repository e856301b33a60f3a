//! HTTP method as a typed enum.
//!
//! Routes are registered against one of these methods. [`Method::All`] is a
//! registration-only wildcard: a route registered with it serves every request
//! method. Incoming methods outside this set never reach a handler; they
//! resolve as not-found.

use std::fmt;
use std::str::FromStr;

/// A routable HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    /// Matches every request method.
    All,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get     => "GET",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Delete  => "DELETE",
            Self::Patch   => "PATCH",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::All     => "ALL",
        }
    }

    /// Whether a route registered with `self` serves a request made with
    /// `requested`.
    pub fn serves(self, requested: Method) -> bool {
        self == Method::All || self == requested
    }

    /// Maps an [`http::Method`] onto the routable set.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        match *method {
            http::Method::GET     => Some(Self::Get),
            http::Method::POST    => Some(Self::Post),
            http::Method::PUT     => Some(Self::Put),
            http::Method::DELETE  => Some(Self::Delete),
            http::Method::PATCH   => Some(Self::Patch),
            http::Method::HEAD    => Some(Self::Head),
            http::Method::OPTIONS => Some(Self::Options),
            _                     => None,
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET"     => Ok(Self::Get),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "DELETE"  => Ok(Self::Delete),
            "PATCH"   => Ok(Self::Patch),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "ALL"     => Ok(Self::All),
            _         => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_serves_every_method() {
        assert!(Method::All.serves(Method::Get));
        assert!(Method::All.serves(Method::Delete));
        assert!(Method::Get.serves(Method::Get));
        assert!(!Method::Get.serves(Method::Post));
    }

    #[test]
    fn parses_wire_names_case_sensitively() {
        assert_eq!("PUT".parse::<Method>(), Ok(Method::Put));
        assert_eq!("ALL".parse::<Method>(), Ok(Method::All));
        assert!("get".parse::<Method>().is_err());
    }

    #[test]
    fn unknown_http_methods_are_not_routable() {
        assert_eq!(Method::from_http(&http::Method::GET), Some(Method::Get));
        assert_eq!(Method::from_http(&http::Method::TRACE), None);
        assert_eq!(Method::from_http(&http::Method::CONNECT), None);
    }
}
