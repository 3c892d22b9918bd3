#[cfg(test)]
mod tests {
    use crate::{Evaluation, Expression, Scope, TemplateEngine, Value};

    fn render(template: &str, scope: Scope) -> String {
        TemplateEngine::process(template, scope).unwrap()
    }

    #[test]
    fn test_member_and_method_calls() {
        let scope = Scope::from_json(serde_json::json!({
            "user": { "name": "ada lovelace", "tags": ["math", "code"] }
        }));
        let out = render("@(user.name.toUpperCase()) [@(user.tags.join('|'))]", scope);
        assert_eq!(out, "ADA LOVELACE [math|code]");
    }

    #[test]
    fn test_ternary_and_logical_operators() {
        let scope = Scope::from_pairs([("n", Value::from(3)), ("title", Value::Null)]);
        let out = render("@(n === 1 ? 'item' : 'items') @(title ?? 'untitled')", scope);
        assert_eq!(out, "items untitled");
    }

    #[test]
    fn test_template_literal() {
        let scope = Scope::from_pairs([("count", Value::from(2))]);
        assert_eq!(render("@(`${count} left`)", scope), "2 left");
    }

    #[test]
    fn test_arrow_functions_in_loop_iterable() {
        let scope = Scope::from_pairs([(
            "nums",
            Value::array(vec![Value::from(1), Value::from(2), Value::from(3), Value::from(4)]),
        )]);
        let out = render("@for (n in nums.filter(x => x % 2 == 0).map(x => x * 10)) {@(n) }", scope);
        assert_eq!(out, "20 40 ");
    }

    #[test]
    fn test_scope_functions_are_callable() {
        let scope = Scope::from_pairs([(
            "greet",
            Value::function("greet", |args| {
                let name = args.first().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
                Ok(Value::from(format!("hello {}", name)))
            }),
        )]);
        assert_eq!(render("@(greet('ada'))", scope), "hello ada");
    }

    #[test]
    fn test_observables_read_transparently() {
        let scope = Scope::from_pairs([("price", Value::observable(4)), ("qty", Value::from(3))]);
        assert_eq!(render("@(price * qty)", scope), "12");
    }

    #[test]
    fn test_assignment_never_reaches_parent_scope() {
        let root = Scope::from_pairs([("total", Value::from(1)), ("hits", Value::observable(0))]);
        let child = root.create_child([("step", Value::from(2))]);

        assert_eq!(Expression::new("total = total + step").execute(&child, &[]), Value::from(3));
        assert_eq!(root.get("total"), Some(Value::from(1)));
        assert!(!child.has_own("total"));

        Expression::new("fresh = 1").execute(&child, &[]);
        assert!(!root.has("fresh"));

        // Observables are shared, so writing one is visible everywhere.
        Expression::new("hits += step").execute(&child, &[]);
        assert_eq!(root.get("hits").map(|v| v.unwrapped()), Some(Value::from(2)));
    }

    #[test]
    fn test_identifiers_and_observables() {
        let shared = Value::observable(1);
        let scope = Scope::from_pairs([("a", shared.clone()), ("b", shared), ("c", Value::from(1))]);
        let expr = Expression::new("a + b + c + Math.max(a, 2)");

        let ids = expr.identifiers();
        assert!(ids.iter().any(|id| id == "a"));
        assert!(ids.iter().any(|id| id == "c"));
        assert_eq!(expr.find_observables(&scope).len(), 1);
    }

    #[test]
    fn test_await_on_resolved_value_is_ready() {
        let scope = Scope::from_pairs([("x", Value::from(5))]);
        match Expression::new("await x").eval(&scope, &[]) {
            Evaluation::Ready(value) => assert_eq!(value, Value::from(5)),
            Evaluation::Pending(_) => panic!("expected a ready value"),
        }
    }

    #[test]
    fn test_parse_errors_are_reported_once() {
        let expr = Expression::new("a +* b");
        assert!(expr.parse_error().is_some());
        assert_eq!(expr.execute(&Scope::new(), &[]), Value::Undefined);
        assert!(expr.try_execute(&Scope::new(), &[]).is_err());
    }
}
