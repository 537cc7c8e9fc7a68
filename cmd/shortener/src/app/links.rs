//! Short links: store, path generator, index page and redirects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use rand::Rng;
use shortener_core::http::{Request, Response, Status};
use shortener_core::router::{HttpError, RouteResult};
use tracing::{debug, info};

use super::form::Form;
use super::html;
use super::l10n::ls;
use super::App;

pub const MAX_URL_LEN: usize = 128;

const SECS_PER_DAY: i64 = 86_400;

/// A shortened link and its redirect statistics.
#[derive(Debug, Clone, Default)]
pub struct Link {
    pub id: u64,
    #[allow(dead_code)]
    pub flags: u32,
    pub raw_url: String,
    /// Stored but not enforced.
    #[allow(dead_code)]
    pub expires_at: Option<i64>,
    /// Days since the Unix epoch to redirect count.
    pub redirects_by_day: HashMap<i64, u64>,
    pub redirects_by_referer: HashMap<String, u64>,
}

/// Links keyed by short path (without the leading `/`).
pub struct LinkStore {
    links: RwLock<HashMap<String, Mutex<Link>>>,
    next_id: AtomicU64,
}

impl Default for LinkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStore {
    pub fn new() -> Self {
        Self { links: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Store `raw_url` under a fresh short path and return the path.
    pub fn create(&self, raw_url: &str) -> String {
        let mut links = self.links.write().unwrap_or_else(|p| p.into_inner());
        let mut rng = rand::thread_rng();
        let path = loop {
            let candidate = generate_path(&mut rng);
            if !links.contains_key(&candidate) {
                break candidate;
            }
        };
        let link = Link {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            raw_url: raw_url.to_string(),
            ..Default::default()
        };
        debug!(id = link.id, path = %path, "link stored");
        links.insert(path.clone(), Mutex::new(link));
        path
    }

    /// Target of `path`, counting the redirect. `None` for unknown paths.
    pub fn follow(&self, path: &str, referer: Option<&str>, now: i64) -> Option<String> {
        let links = self.links.read().unwrap_or_else(|p| p.into_inner());
        let mut link = links.get(path)?.lock().unwrap_or_else(|p| p.into_inner());
        *link.redirects_by_day.entry(now.div_euclid(SECS_PER_DAY)).or_insert(0) += 1;
        if let Some(referer) = referer.filter(|r| !r.is_empty()) {
            *link.redirects_by_referer.entry(referer.to_string()).or_insert(0) += 1;
        }
        Some(link.raw_url.clone())
    }

    #[cfg(test)]
    pub fn get(&self, path: &str) -> Option<Link> {
        let links = self.links.read().unwrap_or_else(|p| p.into_inner());
        let link = links.get(path)?.lock().unwrap_or_else(|p| p.into_inner());
        Some(link.clone())
    }
}

/// `xxx-xxxx-xxx` of lowercase ASCII letters.
pub fn generate_path<R: Rng>(rng: &mut R) -> String {
    (0..12)
        .map(|i| if i == 3 || i == 8 { '-' } else { rng.gen_range(b'a'..=b'z') as char })
        .collect()
}

pub fn validate_url(raw: &str) -> Result<&str, HttpError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(HttpError::bad_request("URL must not be empty"));
    }
    if url.chars().count() > MAX_URL_LEN {
        return Err(HttpError::bad_request(format!("URL must not be longer than {} characters", MAX_URL_LEN)));
    }
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| HttpError::bad_request("URL must start with http:// or https://"))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(HttpError::bad_request("URL must contain a host"));
    }
    Ok(url)
}

impl App {
    /// Index page; `short` is the path of a link just created.
    pub(super) fn index_page(&self, w: &mut Response, r: &Request, short: Option<&str>, err: Option<HttpError>) -> RouteResult {
        let form = Form::parse(r)?;
        let title = "URL shortener";
        if let Some(e) = &err {
            w.status = e.status;
        }

        html::page_start(w, self.lang, title);
        html::heading(w, self.lang, 1, title);
        match self.current_user(r) {
            Some(user) => html::link(w, "/user", &user.email),
            None => {
                html::link(w, "/user/signin", ls(self.lang, "Sign in"));
                w.write_str(" ");
                html::link(w, "/user/signup", ls(self.lang, "Sign up"));
            }
        }
        html::error_banner(w, self.lang, err.as_ref());
        w.write_str("<form method=\"POST\" action=\"/api/url/create\">");
        html::label(w, self.lang, "URL");
        html::constraint_input(w, "url", 1, MAX_URL_LEN, "URL", form.get("URL"), true);
        w.write_str(" ");
        html::submit(w, self.lang, "Shorten!");
        w.write_str("</form>");
        if let Some(short) = short {
            w.write_str("<p>");
            html::label(w, self.lang, "Short link");
            let href = format!("/{}", short);
            html::link(w, &href, &href);
            w.write_str("</p>");
        }
        html::page_end(w);
        Ok(())
    }

    pub(super) fn create_link(&self, w: &mut Response, r: &Request) -> RouteResult {
        let form = Form::parse(r)?;
        let url = match validate_url(form.get("URL")) {
            Ok(url) => url,
            Err(e) => return self.index_page(w, r, None, Some(e)),
        };
        let short = self.links.create(url);
        info!(path = %short, total = self.links.len(), "link created");
        self.index_page(w, r, Some(&short), None)
    }

    /// Redirect for a stored short path.
    pub(super) fn follow_link(&self, w: &mut Response, r: &Request) -> RouteResult {
        let path = r.path.trim_start_matches('/');
        let referer = r.headers.get("Referer");
        match self.links.follow(path, referer, self.clock.now_unix()) {
            Some(target) => {
                debug!(path, target = %target, "redirect");
                w.redirect(&target, Status::SEE_OTHER);
                Ok(())
            }
            None => Err(HttpError::not_found(format!("requested page {:?} does not exist", r.path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn path_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let p = generate_path(&mut rng);
            assert_eq!(p.len(), 12);
            for (i, c) in p.chars().enumerate() {
                if i == 3 || i == 8 {
                    assert_eq!(c, '-');
                } else {
                    assert!(c.is_ascii_lowercase(), "{}", p);
                }
            }
        }
    }

    #[test]
    fn url_rules() {
        assert_eq!(validate_url(" https://example.org/a?b ").unwrap(), "https://example.org/a?b");
        assert!(validate_url("http://x").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("ftp://example.org").is_err());
        assert!(validate_url("https://").is_err());
        assert!(validate_url("https:///path").is_err());
        let long = format!("https://example.org/{}", "a".repeat(MAX_URL_LEN));
        assert!(validate_url(&long).is_err());
    }

    #[test]
    fn follow_counts_by_day_and_referer() {
        let links = LinkStore::new();
        let path = links.create("https://example.org");
        assert_eq!(links.len(), 1);

        let day = 19_000;
        let now = day * SECS_PER_DAY + 10;
        assert_eq!(links.follow(&path, Some("https://ref.example"), now).as_deref(), Some("https://example.org"));
        assert_eq!(links.follow(&path, None, now + 5).as_deref(), Some("https://example.org"));
        assert_eq!(links.follow(&path, Some("https://ref.example"), now + SECS_PER_DAY).as_deref(), Some("https://example.org"));
        assert!(links.follow("zzz-zzzz-zzz", None, now).is_none());

        let link = links.get(&path).unwrap();
        assert_eq!(link.redirects_by_day.get(&day), Some(&2));
        assert_eq!(link.redirects_by_day.get(&(day + 1)), Some(&1));
        assert_eq!(link.redirects_by_referer.get("https://ref.example"), Some(&2));
        assert_eq!(link.expires_at, None);
    }

    #[test]
    fn paths_are_unique() {
        let links = LinkStore::new();
        let a = links.create("https://a.example");
        let b = links.create("https://b.example");
        assert_ne!(a, b);
        assert_ne!(links.get(&a).unwrap().id, links.get(&b).unwrap().id);
    }
}
