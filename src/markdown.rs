const NO_TEXT_PLACEHOLDER: &str = "*No text detected in image.*\n";

/// Renders the fixed-structure Markdown transcript: heading, source image
/// line, optional language line (server output only), a rule, then one
/// bullet per non-empty detected string in engine order.
pub fn render(image_path: &str, language: Option<&str>, texts: &[String]) -> String {
    let mut document = String::from("# OCR Result\n\n");
    document.push_str(&format!("**Source Image:** `{image_path}`\n\n"));
    if let Some(language) = language {
        document.push_str(&format!("**Language:** `{language}`\n\n"));
    }
    document.push_str("---\n\n");

    let mut wrote_any = false;
    for text in texts {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        document.push_str(&format!("- {trimmed}\n"));
        wrote_any = true;
    }
    if !wrote_any {
        document.push_str(NO_TEXT_PLACEHOLDER);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn renders_bullets_in_order() {
        let output = render("scan.png", None, &texts(&["Hello", "World"]));
        assert!(output.starts_with("# OCR Result\n"));
        assert!(output.contains("**Source Image:** `scan.png`"));
        assert!(output.contains("---\n"));
        let hello = output.find("- Hello\n").expect("first bullet");
        let world = output.find("- World\n").expect("second bullet");
        assert!(hello < world);
        assert!(!output.contains("**Language:**"));
    }

    #[test]
    fn includes_language_when_given() {
        let output = render("scan.png", Some("en"), &texts(&["line"]));
        assert!(output.contains("**Language:** `en`"));
    }

    #[test]
    fn empty_results_render_the_placeholder() {
        let output = render("scan.png", Some("ch"), &texts(&["", "   ", "\t"]));
        assert!(output.contains("*No text detected in image.*"));
        assert!(!output.contains("\n- "));
    }

    #[test]
    fn whitespace_is_trimmed_from_bullets() {
        let output = render("scan.png", None, &texts(&["  padded  "]));
        assert!(output.contains("- padded\n"));
    }
}
