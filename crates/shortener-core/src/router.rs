//! Routing boundary.
//!
//! The application layer implements [`Router`]; the Worker calls it once per
//! parsed request through [`route_isolated`], which turns a panicking
//! handler into an ordinary server error. A fault in one handler therefore
//! never unwinds past the Worker's batch loop.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::http::{Request, Response, Status};

/// A handler failure, classified by its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: Status,
    pub message: String,
}

impl HttpError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Status::CONFLICT, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(Status::METHOD_NOT_ALLOWED, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(Status::INTERNAL_SERVER_ERROR, message)
    }

    /// Server error built from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::server_error(format!("panic: {}", msg))
    }

    #[inline]
    pub fn is_client(&self) -> bool {
        self.status.is_client_error()
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.status.is_server_error()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.0, self.message)
    }
}

impl std::error::Error for HttpError {}

pub type RouteResult = Result<(), HttpError>;

/// Maps a parsed request to a handler.
///
/// **Contract:**
/// - `route()` fills `w` and returns `Ok(())`, or returns an error that
///   `render_error()` will turn into the response body.
/// - Called concurrently from every Worker thread.
/// - May panic; the Worker catches it (see [`route_isolated`]).
pub trait Router: Send + Sync {
    fn route(&self, w: &mut Response, r: &Request) -> RouteResult;

    /// Render `err` into `w`. The default emits a plain-text body.
    fn render_error(&self, w: &mut Response, _r: &Request, err: &HttpError) {
        w.body.clear();
        w.status = err.status;
        w.headers.set("Content-Type", "text/plain; charset=\"UTF-8\"");
        w.write_str(&err.message);
        w.write_str("\n");
    }
}

/// Call `router.route` with panics converted into a 500 error.
pub fn route_isolated<R: Router + ?Sized>(router: &R, w: &mut Response, r: &Request) -> RouteResult {
    match panic::catch_unwind(AssertUnwindSafe(|| router.route(w, r))) {
        Ok(result) => result,
        Err(payload) => Err(HttpError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Faulty;

    impl Router for Faulty {
        fn route(&self, w: &mut Response, r: &Request) -> RouteResult {
            match r.path.as_str() {
                "/ok" => {
                    w.write_str("fine");
                    Ok(())
                }
                "/missing" => Err(HttpError::not_found("nope")),
                _ => panic!("handler blew up"),
            }
        }
    }

    fn req(path: &str) -> Request {
        Request { path: path.to_string(), ..Default::default() }
    }

    #[test]
    fn ok_passes_through() {
        let mut w = Response::default();
        assert!(route_isolated(&Faulty, &mut w, &req("/ok")).is_ok());
        assert_eq!(w.body, b"fine");
    }

    #[test]
    fn client_error_is_classified() {
        let mut w = Response::default();
        let err = route_isolated(&Faulty, &mut w, &req("/missing")).unwrap_err();
        assert!(err.is_client());
        assert!(!err.is_server());
    }

    #[test]
    fn panic_becomes_server_error() {
        let mut w = Response::default();
        let err = route_isolated(&Faulty, &mut w, &req("/boom")).unwrap_err();
        assert_eq!(err.status, Status::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "panic: handler blew up");

        // The router is still usable afterwards.
        let mut w = Response::default();
        assert!(route_isolated(&Faulty, &mut w, &req("/ok")).is_ok());
    }

    #[test]
    fn default_render_error() {
        let mut w = Response::default();
        w.write_str("partial");
        Faulty.render_error(&mut w, &req("/"), &HttpError::conflict("taken"));
        assert_eq!(w.status, Status::CONFLICT);
        assert_eq!(w.body, b"taken\n");
    }
}
