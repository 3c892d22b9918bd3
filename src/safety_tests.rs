//! Static-directive enforcement.
//!
//! `@ref` and `@inject` bind once, after insertion. A reactive target would
//! silently go stale, so the engine refuses it with T-ERR-STATIC-001:
//! - at parse time, as an error from `parse`
//! - during a rebuild, by logging and leaving the section empty

#[cfg(test)]
mod tests {
    use crate::error::ERR_STATIC_DIRECTIVE;
    use crate::{Document, EngineError, Scope, TemplateEngine, Value};

    fn parse_error(template: &str, scope: Scope) -> EngineError {
        TemplateEngine::create(template, scope).unwrap_err()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // T-ERR-STATIC-001: Parse Time
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_reactive_ref_name_is_rejected() {
        let scope = Scope::from_pairs([("name", Value::observable("box"))]);
        let err = parse_error("<div @ref(name)></div>", scope);

        assert_eq!(err.code(), ERR_STATIC_DIRECTIVE);
        assert!(!err.guarantee().is_empty());
        match err {
            EngineError::StaticDirective {
                directive,
                expression,
            } => {
                assert_eq!(directive, "ref");
                assert_eq!(expression, "name");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_reactive_injection_target_is_rejected() {
        let scope = Scope::from_pairs([("target", Value::observable("box"))]);
        let err = parse_error("<div @ref('box')></div><p @inject:head(target)>x</p>", scope);
        assert!(matches!(
            err,
            EngineError::StaticDirective { ref directive, .. } if directive == "inject"
        ));
    }

    #[test]
    fn test_violation_inside_nested_block_surfaces() {
        let scope = Scope::from_pairs([
            ("rows", Value::array(vec![Value::from(1)])),
            ("name", Value::observable("row")),
        ]);
        let err = parse_error("@for (r in rows) {@if (r) {<b @ref(name)>x</b>}}", scope);
        assert_eq!(err.code(), ERR_STATIC_DIRECTIVE);
    }

    #[test]
    fn test_static_values_are_accepted() {
        let scope = Scope::from_pairs([
            ("name", Value::from("box")),
            ("index", Value::from(2)),
        ]);
        let instance = TemplateEngine::create(
            "<div @ref(name)></div><div @ref('item' + index)></div>",
            scope.clone(),
        )
        .unwrap();

        let container = Document::new().create_element("main");
        instance.bind(&container).unwrap();
        assert!(scope.get("box").and_then(|v| v.as_node().cloned()).is_some());
        assert!(scope.get("item2").and_then(|v| v.as_node().cloned()).is_some());
    }

    #[test]
    fn test_non_name_target_is_not_claimed() {
        let scope = Scope::from_pairs([("flag", Value::from(true))]);
        let out = TemplateEngine::process("<div @ref(flag)>x</div>", scope.clone()).unwrap();
        assert_eq!(out, "<div>x</div>");
        assert!(!scope.has("true"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // T-ERR-STATIC-001: Rebuild Time
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_violation_during_rebuild_empties_section() {
        let scope = Scope::from_pairs([
            ("open", Value::observable(false)),
            ("name", Value::observable("panel")),
        ]);
        let instance = TemplateEngine::create("<p>@if (open) {<i @ref(name)>x</i>}</p>", scope.clone()).unwrap();
        let container = Document::new().create_element("div");
        instance.bind(&container).unwrap();

        scope
            .get("open")
            .and_then(|v| v.as_observable().cloned())
            .unwrap()
            .set(Value::from(true));

        assert_eq!(container.text_content(), "");
        assert!(container.query_selector("i").is_none());
        assert!(!scope.has("panel"));
        assert!(!instance.is_disposed());
    }
}
