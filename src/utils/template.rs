//! String template rendering utilities.

use std::collections::HashMap;

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

pub fn is_present(template: &str, key: &str) -> bool {
    let placeholder = format!("{{{{{}}}}}", key);
    template.contains(&placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_map_replaces_every_occurrence() {
        let mut vars = HashMap::new();
        vars.insert("php".to_string(), "php8.2".to_string());

        assert_eq!(
            render_map("{{php}} bin/console && {{php}} -v", &vars),
            "php8.2 bin/console && php8.2 -v"
        );
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let vars = HashMap::new();
        assert_eq!(render_map("echo {{missing}}", &vars), "echo {{missing}}");
        assert!(is_present("echo {{missing}}", "missing"));
    }
}
