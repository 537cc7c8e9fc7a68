//! Small HTML building blocks shared by the pages.

use shortener_core::http::Response;
use shortener_core::router::HttpError;

use super::l10n::{ls, Language};

pub fn page_start(w: &mut Response, lang: Language, title: &str) {
    w.write_str("<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>");
    w.write_html(ls(lang, title));
    w.write_str("</title></head><body>");
}

pub fn page_end(w: &mut Response) {
    w.write_str("</body></html>");
}

pub fn heading(w: &mut Response, lang: Language, level: u8, text: &str) {
    w.write_str("<h");
    w.write_int(level as i64);
    w.write_str(">");
    w.write_html(ls(lang, text));
    w.write_str("</h");
    w.write_int(level as i64);
    w.write_str(">");
}

pub fn label(w: &mut Response, lang: Language, text: &str) {
    w.write_str("<label>");
    w.write_html(ls(lang, text));
    w.write_str(":</label> ");
}

/// `<input>` with length bounds and an escaped value.
pub fn constraint_input(w: &mut Response, kind: &str, min: usize, max: usize, name: &str, value: &str, required: bool) {
    w.write_str("<input type=\"");
    w.write_str(kind);
    w.write_str("\" minlength=\"");
    w.write_int(min as i64);
    w.write_str("\" maxlength=\"");
    w.write_int(max as i64);
    w.write_str("\" name=\"");
    w.write_str(name);
    w.write_str("\" value=\"");
    w.write_html(value);
    w.write_str("\"");
    if required {
        w.write_str(" required");
    }
    w.write_str(">");
}

pub fn submit(w: &mut Response, lang: Language, value: &str) {
    w.write_str("<input type=\"submit\" value=\"");
    w.write_html(ls(lang, value));
    w.write_str("\">");
}

/// Inline error banner above a form.
pub fn error_banner(w: &mut Response, lang: Language, err: Option<&HttpError>) {
    if let Some(err) = err {
        w.write_str("<p class=\"error\">");
        w.write_html(ls(lang, "Error"));
        w.write_str(": ");
        w.write_html(&err.message);
        w.write_str("</p>");
    }
}

pub fn link(w: &mut Response, href: &str, text: &str) {
    w.write_str("<a href=\"");
    w.write_html(href);
    w.write_str("\">");
    w.write_html(text);
    w.write_str("</a>");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_escapes_value() {
        let mut w = Response::default();
        constraint_input(&mut w, "text", 1, 64, "FirstName", "\"><script>", true);
        assert_eq!(
            std::str::from_utf8(&w.body).unwrap(),
            "<input type=\"text\" minlength=\"1\" maxlength=\"64\" name=\"FirstName\" value=\"&quot;&gt;&lt;script&gt;\" required>"
        );
    }

    #[test]
    fn banner_only_with_error() {
        let mut w = Response::default();
        error_banner(&mut w, Language::En, None);
        assert!(w.body.is_empty());
        error_banner(&mut w, Language::En, Some(&HttpError::bad_request("bad <input>")));
        assert_eq!(std::str::from_utf8(&w.body).unwrap(), "<p class=\"error\">Error: bad &lt;input&gt;</p>");
    }
}
