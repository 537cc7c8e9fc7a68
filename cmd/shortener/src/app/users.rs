//! Accounts: in-memory user store, validation, sign-in/up/out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use shortener_core::http::{http_date, Request, Response, Status};
use shortener_core::router::{HttpError, RouteResult};
use shortener_module::session_store::SessionError;
use tracing::{debug, info};

use super::form::Form;
use super::html;
use super::l10n::ls;
use super::App;

pub const MIN_NAME_LEN: usize = 1;
pub const MAX_NAME_LEN: usize = 64;
pub const MIN_EMAIL_LEN: usize = 1;
pub const MAX_EMAIL_LEN: usize = 128;
pub const MIN_PASSWORD_LEN: usize = 5;
pub const MAX_PASSWORD_LEN: usize = 64;

pub const SESSION_COOKIE: &str = "Token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub created_on: i64,
}

/// Users keyed by email.
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
    next_id: AtomicU64,
}

impl UserStore {
    /// Store holding the built-in `test@test.com` account.
    pub fn seeded(now: i64) -> Self {
        let store = Self { users: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) };
        let _ = store.create("Test", "Test", "test@test.com", "testtest", now);
        store
    }

    pub fn by_email(&self, email: &str) -> Option<User> {
        self.users.read().unwrap_or_else(|p| p.into_inner()).get(email).cloned()
    }

    pub fn by_id(&self, id: u64) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .find(|u| u.id == id)
            .cloned()
    }

    /// Insert a new account. `None` when the email is taken.
    pub fn create(&self, first: &str, last: &str, email: &str, password: &str, now: i64) -> Option<User> {
        let mut users = self.users.write().unwrap_or_else(|p| p.into_inner());
        if users.contains_key(email) {
            return None;
        }
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            created_on: now,
        };
        users.insert(email.to_string(), user.clone());
        Some(user)
    }
}

fn char_len_in(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.chars().count())
}

/// Letter first; then letters, spaces, dots, hyphens, apostrophes.
pub fn validate_name(name: &str) -> Result<(), HttpError> {
    if !char_len_in(name, MIN_NAME_LEN, MAX_NAME_LEN) {
        return Err(HttpError::bad_request(format!(
            "length of the name must be between {} and {} characters",
            MIN_NAME_LEN, MAX_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    if !chars.next().is_some_and(char::is_alphabetic) {
        return Err(HttpError::bad_request("first character of the name must be a letter"));
    }
    if !chars.all(|c| c.is_alphabetic() || matches!(c, ' ' | '.' | '-' | '\'')) {
        return Err(HttpError::bad_request(
            "second and latter characters of the name must be letters, spaces, dots, hyphens or apostrophes",
        ));
    }
    Ok(())
}

/// `local@domain`, trimmed, no whitespace inside.
pub fn validate_email(raw: &str) -> Result<&str, HttpError> {
    let email = raw.trim();
    let invalid = || HttpError::bad_request("provided email is not valid");
    if !char_len_in(email, MIN_EMAIL_LEN, MAX_EMAIL_LEN) || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(email),
        _ => Err(invalid()),
    }
}

pub fn validate_password(password: &str, repeat: &str) -> Result<(), HttpError> {
    if !char_len_in(password, MIN_PASSWORD_LEN, MAX_PASSWORD_LEN) {
        return Err(HttpError::bad_request(format!(
            "password length must be between {} and {} characters long",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }
    if password != repeat {
        return Err(HttpError::bad_request("passwords do not match each other"));
    }
    Ok(())
}

impl App {
    /// Account behind the request's session cookie, if any.
    pub(super) fn current_user(&self, r: &Request) -> Option<User> {
        let token = r.cookie(SESSION_COOKIE)?;
        match self.sessions.lookup(token) {
            Ok(session) => self.users.by_id(session.subject),
            Err(SessionError::Expired) => {
                debug!("session cookie expired");
                None
            }
            Err(_) => None,
        }
    }

    pub(super) fn user_page(&self, w: &mut Response, r: &Request) -> RouteResult {
        let user = match self.current_user(r) {
            Some(user) => user,
            None => {
                w.redirect("/user/signin", Status::SEE_OTHER);
                return Ok(());
            }
        };

        html::page_start(w, self.lang, "User");
        html::heading(w, self.lang, 2, "User");
        w.write_str("<p>");
        w.write_html(&user.first_name);
        w.write_str(" ");
        w.write_html(&user.last_name);
        w.write_str("</p><p>");
        w.write_html(&user.email);
        w.write_str("</p><p>");
        w.write_str(&http_date(user.created_on));
        w.write_str("</p>");
        w.write_str("<form method=\"POST\" action=\"/api/user/signout\">");
        html::submit(w, self.lang, "Sign out");
        w.write_str("</form>");
        html::page_end(w);
        Ok(())
    }

    /// Sign-in form; `err` is shown above it and sets the status.
    pub(super) fn signin_page(&self, w: &mut Response, r: &Request, err: Option<HttpError>) -> RouteResult {
        let form = Form::parse(r)?;
        let title = "Sign in";
        if let Some(e) = &err {
            w.status = e.status;
        }

        html::page_start(w, self.lang, title);
        html::heading(w, self.lang, 2, title);
        html::error_banner(w, self.lang, err.as_ref());
        w.write_str("<form method=\"POST\" action=\"/api/user/signin\">");
        html::label(w, self.lang, "Email");
        html::constraint_input(w, "email", MIN_EMAIL_LEN, MAX_EMAIL_LEN, "Email", form.get("Email"), true);
        w.write_str("<br><br>");
        html::label(w, self.lang, "Password");
        html::constraint_input(w, "password", MIN_PASSWORD_LEN, MAX_PASSWORD_LEN, "Password", "", true);
        w.write_str("<br><br>");
        html::submit(w, self.lang, title);
        w.write_str("</form>");
        html::page_end(w);
        Ok(())
    }

    pub(super) fn signup_page(&self, w: &mut Response, r: &Request, err: Option<HttpError>) -> RouteResult {
        let form = Form::parse(r)?;
        let title = "Sign up";
        if let Some(e) = &err {
            w.status = e.status;
        }

        html::page_start(w, self.lang, title);
        html::heading(w, self.lang, 2, title);
        html::error_banner(w, self.lang, err.as_ref());
        w.write_str("<form method=\"POST\" action=\"/api/user/signup\">");
        for (label, name, kind, min, max) in [
            ("First Name", "FirstName", "text", MIN_NAME_LEN, MAX_NAME_LEN),
            ("Last Name", "LastName", "text", MIN_NAME_LEN, MAX_NAME_LEN),
            ("Email", "Email", "email", MIN_EMAIL_LEN, MAX_EMAIL_LEN),
        ] {
            html::label(w, self.lang, label);
            html::constraint_input(w, kind, min, max, name, form.get(name), true);
            w.write_str("<br><br>");
        }
        for (label, name) in [("Password", "Password"), ("Repeat Password", "RepeatPassword")] {
            html::label(w, self.lang, label);
            html::constraint_input(w, "password", MIN_PASSWORD_LEN, MAX_PASSWORD_LEN, name, "", true);
            w.write_str("<br><br>");
        }
        html::submit(w, self.lang, title);
        w.write_str("</form>");
        html::page_end(w);
        Ok(())
    }

    pub(super) fn signin(&self, w: &mut Response, r: &Request) -> RouteResult {
        let form = Form::parse(r)?;

        let email = match validate_email(form.get("Email")) {
            Ok(email) => email,
            Err(e) => return self.signin_page(w, r, Some(e)),
        };
        let user = match self.users.by_email(email) {
            Some(user) => user,
            None => {
                let e = HttpError::not_found(ls(self.lang, "user with this email does not exist"));
                return self.signin_page(w, r, Some(e));
            }
        };
        if user.password != form.get("Password") {
            let e = HttpError::conflict(ls(self.lang, "provided password is incorrect"));
            return self.signin_page(w, r, Some(e));
        }

        let session = self
            .sessions
            .create(user.id)
            .map_err(|e| HttpError::server_error(format!("cannot create session: {}", e)))?;
        w.set_cookie(SESSION_COOKIE, &session.token, session.expiry, !self.debug);
        w.redirect("/", Status::SEE_OTHER);
        info!(user = user.id, "signed in");
        Ok(())
    }

    pub(super) fn signup(&self, w: &mut Response, r: &Request) -> RouteResult {
        let form = Form::parse(r)?;

        let first = form.get("FirstName");
        let last = form.get("LastName");
        let checked = validate_name(first)
            .and_then(|_| validate_name(last))
            .and_then(|_| validate_email(form.get("Email")))
            .and_then(|email| validate_password(form.get("Password"), form.get("RepeatPassword")).map(|_| email));
        let email = match checked {
            Ok(email) => email,
            Err(e) => return self.signup_page(w, r, Some(e)),
        };

        match self.users.create(first, last, email, form.get("Password"), self.clock.now_unix()) {
            Some(user) => {
                info!(user = user.id, "signed up");
                w.redirect("/", Status::SEE_OTHER);
                Ok(())
            }
            None => {
                let e = HttpError::conflict(ls(self.lang, "user with this email already exists"));
                self.signup_page(w, r, Some(e))
            }
        }
    }

    pub(super) fn signout(&self, w: &mut Response, r: &Request) -> RouteResult {
        if let Some(token) = r.cookie(SESSION_COOKIE) {
            self.sessions.delete(token);
        }
        w.delete_cookie(SESSION_COOKIE);
        w.redirect("/", Status::SEE_OTHER);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert!(validate_name("Anne-Marie O'Neil Jr.").is_ok());
        assert!(validate_name("Жанна").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("1abc").is_err());
        assert!(validate_name("ab_c").is_err());
        assert!(validate_name(&"a".repeat(64)).is_ok());
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn email_rules() {
        assert_eq!(validate_email(" user@example.org ").unwrap(), "user@example.org");
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.org").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("a b@c").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("secret", "secret").is_ok());
        assert!(validate_password("four", "four").is_err());
        assert!(validate_password("secret", "secreT").is_err());
    }

    #[test]
    fn store_is_seeded_and_rejects_duplicates() {
        let users = UserStore::seeded(0);
        let test = users.by_email("test@test.com").unwrap();
        assert_eq!(test.password, "testtest");
        assert_eq!(users.by_id(test.id), Some(test));
        assert!(users.create("A", "B", "test@test.com", "xxxxx", 0).is_none());
        let new = users.create("A", "B", "a@b.c", "xxxxx", 0).unwrap();
        assert_ne!(new.id, users.by_email("test@test.com").unwrap().id);
    }
}
