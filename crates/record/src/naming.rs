//! Naming conventions shared by attributes and table names
//!
//! Attribute keys may be written in any case convention; the storage form is
//! always lowercase snake case. Default table names are the plural of the
//! snake-cased model name.

/// Convert an identifier to snake case.
///
/// Word boundaries are lower→upper (`fooBar`), digit→upper (`line1Text`),
/// the end of an acronym (`HTTPServer`), hyphens and whitespace. The result
/// never contains uppercase letters, so the conversion is idempotent.
pub fn to_snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c.is_whitespace() {
            result.push('_');
            continue;
        }

        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower)
                {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization of the last word of a snake-case name
pub fn pluralize(name: &str) -> String {
    let vowel_y = ["ay", "ey", "iy", "oy", "uy"];

    if name.ends_with('y') && name.len() > 1 && !vowel_y.iter().any(|s| name.ends_with(s)) {
        format!("{}ies", &name[..name.len() - 1])
    } else if name.ends_with('s')
        || name.ends_with("sh")
        || name.ends_with("ch")
        || name.ends_with('x')
        || name.ends_with('z')
    {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}

/// Default table name for a model type name: `BlogPost` → `blog_posts`
pub fn default_table_name(model_name: &str) -> String {
    pluralize(&to_snake_case(model_name))
}
