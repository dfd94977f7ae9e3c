use std::time::Instant;

/// Prints the wall time elapsed since `start` as h:mm:ss.
pub fn print_hms(start: &Instant) {
    let secs = start.elapsed().as_secs();
    println!("Elapsed: {}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
}

/// Escapes text for embedding in popup HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<img src=x onerror="alert('1')">&"#),
            "&lt;img src=x onerror=&quot;alert(&#39;1&#39;)&quot;&gt;&amp;"
        );
        assert_eq!(escape_html("two vans"), "two vans");
    }
}
