//! The URL shortener's router: pages, account API, link API and redirects.

pub mod form;
pub mod html;
pub mod l10n;
pub mod links;
pub mod users;

use std::sync::Arc;

use shortener_core::clock::Clock;
use shortener_core::http::{Method, Request, Response};
use shortener_core::router::{HttpError, RouteResult, Router};
use shortener_module::session_store::SessionStore;

use self::l10n::{ls, Language};
use self::links::LinkStore;
use self::users::UserStore;

const HTML_CONTENT_TYPE: &str = "text/html; charset=\"UTF-8\"";

/// Application state shared by every worker.
pub struct App {
    users: UserStore,
    links: LinkStore,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    lang: Language,
    debug: bool,
}

impl App {
    pub fn new(sessions: Arc<SessionStore>, clock: Arc<dyn Clock>, lang: Language, debug: bool) -> Self {
        Self {
            users: UserStore::seeded(clock.now_unix()),
            links: LinkStore::new(),
            sessions,
            clock,
            lang,
            debug,
        }
    }
}

fn post_only(r: &Request) -> Result<(), HttpError> {
    if r.method == Method::Post {
        Ok(())
    } else {
        Err(HttpError::method_not_allowed(format!("method {} is not allowed", r.method)))
    }
}

impl Router for App {
    fn route(&self, w: &mut Response, r: &Request) -> RouteResult {
        w.headers.set("Content-Type", HTML_CONTENT_TYPE);

        match r.path.as_str() {
            "/" | "/index.html" => self.index_page(w, r, None, None),

            "/user" | "/user/" => self.user_page(w, r),
            "/user/signin" => self.signin_page(w, r, None),
            "/user/signup" => self.signup_page(w, r, None),

            "/api/user/signin" => post_only(r).and_then(|_| self.signin(w, r)),
            "/api/user/signup" => post_only(r).and_then(|_| self.signup(w, r)),
            "/api/user/signout" => post_only(r).and_then(|_| self.signout(w, r)),
            "/api/url/create" => post_only(r).and_then(|_| self.create_link(w, r)),

            "/error" => Err(HttpError::server_error("test error")),
            "/panic" => panic!("test panic"),

            path if path.starts_with("/fs/") => Err(HttpError::not_found("requested file does not exist")),
            _ => self.follow_link(w, r),
        }
    }

    fn render_error(&self, w: &mut Response, _r: &Request, err: &HttpError) {
        w.body.clear();
        w.headers.clear();
        w.status = err.status;
        w.headers.set("Content-Type", HTML_CONTENT_TYPE);

        let title = format!("{} {}", err.status.0, err.status.reason());
        html::page_start(w, Language::En, &title);
        w.write_str("<h1>");
        w.write_html(&title);
        w.write_str("</h1>");
        if !err.is_server() || self.debug {
            w.write_str("<p>");
            w.write_html(ls(self.lang, "Error"));
            w.write_str(": ");
            w.write_html(&err.message);
            w.write_str("</p>");
        }
        html::page_end(w);
    }
}
