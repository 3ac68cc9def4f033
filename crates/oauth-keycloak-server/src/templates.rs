//! Server-rendered HTML pages.

use crate::presenter::SessionView;

const STYLES: &str = r#"
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    max-width: 40rem;
    margin: 3rem auto;
    padding: 0 1rem;
    color: #1c1f40;
    line-height: 1.5;
}
nav a, nav button { margin-right: 1rem; }
nav form { display: inline; }
dl { display: grid; grid-template-columns: max-content auto; gap: 0.25rem 1rem; }
dt { font-weight: 600; }
.error-code { font-family: monospace; color: #6c757d; }
"#;

fn html_page(title: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + 1024);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str("</title>\n    <style>");
    html.push_str(STYLES);
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(content);
    html.push_str("\n</body>\n</html>");
    html
}

fn render_nav(view: &SessionView, login_path: &str) -> String {
    let mut nav = String::from("<nav>\n<a href=\"/\">Home</a>\n<a href=\"/nice\">Nice</a>\n");
    if view.is_authenticated {
        nav.push_str(
            "<form method=\"post\" action=\"/logout\"><button type=\"submit\">Logout</button></form>\n",
        );
    } else {
        nav.push_str("<a href=\"");
        nav.push_str(&html_escape(login_path));
        nav.push_str("\">Login</a>\n");
    }
    nav.push_str("</nav>\n");
    nav
}

fn render_view(view: &SessionView) -> String {
    format!(
        "<dl>\n<dt>name</dt><dd id=\"name\">{}</dd>\n\
         <dt>isAuthenticated</dt><dd id=\"isAuthenticated\">{}</dd>\n\
         <dt>isNice</dt><dd id=\"isNice\">{}</dd>\n</dl>\n",
        html_escape(&view.name),
        view.is_authenticated,
        view.is_nice
    )
}

/// Public landing page.
pub fn render_home(view: &SessionView, login_path: &str) -> String {
    let mut content = render_nav(view, login_path);
    if view.is_authenticated {
        content.push_str("<h1>Hello ");
        content.push_str(&html_escape(&view.name));
        content.push_str("</h1>\n");
    } else {
        content.push_str("<h1>Hello</h1>\n<p>You are not logged in.</p>\n");
    }
    content.push_str(&render_view(view));
    html_page("Home", &content)
}

/// Page reserved to users with the `NICE` role.
pub fn render_nice(view: &SessionView, login_path: &str) -> String {
    let mut content = render_nav(view, login_path);
    content.push_str("<h1>Only nice people can see this</h1>\n");
    content.push_str(&render_view(view));
    html_page("Nice", &content)
}

/// Error page with a stable code and a description.
pub fn render_error_page(title: &str, error_code: &str, description: &str) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<h1>");
    content.push_str(&html_escape(title));
    content.push_str("</h1>\n<p>");
    content.push_str(&html_escape(description));
    content.push_str("</p>\n<p class=\"error-code\">");
    content.push_str(&html_escape(error_code));
    content.push_str("</p>\n<p><a href=\"/\">Back to home</a></p>");
    html_page(title, &content)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
