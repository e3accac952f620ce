use std::collections::HashMap;

/// Replaces every `{{key}}` placeholder that has a value in `variables`.
/// Placeholders without a value are left as written. Substituted values are
/// never scanned again.
pub fn interpolate(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            result.push_str(&rest[start..]);
            return result;
        };
        match variables.get(&after[..end]) {
            Some(value) => {
                result.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                result.push_str("{{");
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = &after[..end];
        if !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !names.iter().any(|n| n == name)
        {
            names.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let vars = HashMap::from([("name".to_string(), "Ada".to_string())]);
        assert_eq!(interpolate("Hi {{name}}, bye {{name}}", &vars), "Hi Ada, bye Ada");
    }

    #[test]
    fn leaves_missing_variables_literal() {
        assert_eq!(interpolate("Hi {{name}}", &HashMap::new()), "Hi {{name}}");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let vars = HashMap::from([
            ("a".to_string(), "{{b}}".to_string()),
            ("b".to_string(), "X".to_string()),
        ]);
        for _ in 0..50 {
            let vars: HashMap<String, String> = vars.clone().into_iter().collect();
            assert_eq!(interpolate("{{a}} {{b}}", &vars), "{{b}} X");
        }
    }

    #[test]
    fn unmatched_braces_stay_literal() {
        let vars = HashMap::from([("a".to_string(), "1".to_string())]);
        assert_eq!(interpolate("{{ {{a}} {{missing}} {{a", &vars), "{{ 1 {{missing}} {{a");
    }

    #[test]
    fn lists_placeholders_once() {
        assert_eq!(
            placeholders("{{first}} {{last}} {{first}} {{bad name}} {{"),
            vec!["first".to_string(), "last".to_string()]
        );
    }
}
