#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::{Document, EngineError, Node, Promise, Scope, TemplateEngine, TemplateInstance, Value};

    fn host() -> Node {
        let document = Document::new();
        let container = document.create_element("div");
        document.body().append_child(&container);
        container
    }

    fn bound(template: &str, scope: &Scope) -> (TemplateInstance, Node) {
        let instance = TemplateEngine::create(template, scope.clone()).unwrap();
        let container = host();
        instance.bind(&container).unwrap();
        (instance, container)
    }

    fn set(scope: &Scope, name: &str, value: Value) {
        scope
            .get(name)
            .and_then(|v| v.as_observable().cloned())
            .expect("observable binding")
            .set(value);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // REACTIVE UPDATES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_interpolation_follows_observable() {
        let scope = Scope::from_pairs([("n", Value::observable(0))]);
        let (_instance, container) = bound("Count: @(n)", &scope);
        assert_eq!(container.text_content(), "Count: 0");

        set(&scope, "n", Value::from(5));
        assert_eq!(container.text_content(), "Count: 5");
    }

    #[test]
    fn test_loop_converges_with_fresh_render() {
        let template = "<ul>@for (item in items) {<li>@(item)</li>}</ul>";
        let scope = Scope::from_pairs([(
            "items",
            Value::observable(Value::array(vec![Value::from("a"), Value::from("b")])),
        )]);
        let (instance, container) = bound(template, &scope);
        assert_eq!(container.query_selector_all("li").len(), 2);

        let next = Value::array(vec![Value::from("c"), Value::from("a"), Value::from("b")]);
        set(&scope, "items", next.clone());
        assert_eq!(container.query_selector_all("li").len(), 3);
        assert_eq!(container.text_content(), "cab");

        let fresh = TemplateEngine::process(template, Scope::from_pairs([("items", next)])).unwrap();
        assert_eq!(instance.get_template(), fresh);
    }

    #[test]
    fn test_conditional_switches_branches() {
        let scope = Scope::from_pairs([("on", Value::observable(true))]);
        let (_instance, container) = bound("<p>@if (on) {<b>yes</b>} @else {<i>no</i>}</p>", &scope);
        assert!(container.query_selector("b").is_some());

        set(&scope, "on", Value::from(false));
        assert!(container.query_selector("b").is_none());
        assert_eq!(container.query_selector("i").map(|n| n.text_content()), Some("no".into()));

        set(&scope, "on", Value::from(true));
        assert_eq!(container.text_content(), "yes");
    }

    #[test]
    fn test_sibling_regions_update_independently() {
        let scope = Scope::from_pairs([("a", Value::observable("1")), ("b", Value::observable("2"))]);
        let (_instance, container) = bound("<p>@(a)</p><p>@(b)</p>", &scope);
        let second = container.query_selector_all("p")[1].clone();
        let untouched = second.first_child();

        set(&scope, "a", Value::from("x"));
        assert_eq!(container.text_content(), "x2");
        assert_eq!(second.first_child(), untouched);
    }

    #[test]
    fn test_raw_text_element_updates_without_markers() {
        let scope = Scope::from_pairs([("v", Value::observable("a")), ("on", Value::observable(true))]);
        let (instance, container) = bound("<textarea>@(v)@if (on) {!}</textarea><p>@(v)</p>", &scope);
        let textarea = || container.query_selector("textarea").expect("textarea");
        assert_eq!(textarea().text_content(), "a!");

        set(&scope, "v", Value::from("b"));
        assert_eq!(textarea().text_content(), "b!");
        assert_eq!(container.query_selector("p").map(|p| p.text_content()), Some("b".into()));

        set(&scope, "on", Value::from(false));
        assert_eq!(textarea().text_content(), "b");
        assert!(!textarea().text_content().contains("tpl:"));
        assert_eq!(instance.get_template(), "<textarea>b</textarea><p>b</p>");
    }

    #[test]
    fn test_document_slots_reused_across_updates() {
        let scope = Scope::from_pairs([("n", Value::observable(3))]);
        let (_instance, container) = bound("<ul>@for (i in n) {<li>@(i)</li>}</ul><p>@(n)</p>", &scope);
        let document = container.document().clone();
        let settled = document.node_count();

        for round in 0..200 {
            set(&scope, "n", Value::from(4 + round % 2));
        }
        set(&scope, "n", Value::from(3));
        assert_eq!(container.query_selector_all("li").len(), 3);
        assert_eq!(document.node_count(), settled);
    }

    #[test]
    fn test_nested_sections_rebuild_once() {
        let scope = Scope::from_pairs([
            ("rows", Value::observable(Value::array(vec![Value::from(1)]))),
            ("label", Value::observable("n")),
        ]);
        let (instance, container) = bound("@for (r in rows) {<span>@(label)@(r)</span>}", &scope);
        let changes = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&changes);
        instance.on_fragment_change(move |_| *counter.borrow_mut() += 1);

        set(&scope, "label", Value::from("m"));
        assert_eq!(container.text_content(), "m1");
        assert_eq!(*changes.borrow(), 1);

        set(&scope, "rows", Value::array(vec![Value::from(1), Value::from(2)]));
        assert_eq!(container.text_content(), "m1m2");
        assert_eq!(*changes.borrow(), 2);

        // The new row's interpolation is tracked as well.
        set(&scope, "label", Value::from("k"));
        assert_eq!(container.text_content(), "k1k2");
    }

    #[test]
    fn test_all_containers_stay_consistent() {
        let scope = Scope::from_pairs([("name", Value::observable("Ada"))]);
        let instance = TemplateEngine::create("<h1>@(name)</h1>", scope.clone()).unwrap();
        let first = host();
        let second = host();
        instance.bind(&first).unwrap();
        instance.bind(&second).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        instance.on_fragment_change(move |change| log.borrow_mut().push(change.container.clone()));

        set(&scope, "name", Value::from("Grace"));
        assert_eq!(first.text_content(), "Grace");
        assert_eq!(second.text_content(), "Grace");
        assert_eq!(*seen.borrow(), vec![first, second]);
    }

    #[test]
    fn test_untracked_after_region_disappears() {
        let scope = Scope::from_pairs([
            ("show", Value::observable(true)),
            ("inner", Value::observable("x")),
        ]);
        let (instance, container) = bound("@if (show) {<b>@(inner)</b>}", &scope);
        assert_eq!(instance.tracked_observables(), 2);

        set(&scope, "show", Value::from(false));
        assert_eq!(container.text_content(), "");
        assert_eq!(instance.tracked_observables(), 1);

        let inner = scope.get("inner").and_then(|v| v.as_observable().cloned()).unwrap();
        assert_eq!(inner.subscriber_count(), 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // REFS, INJECTION AND EVENTS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_injection_appends_after_existing_children() {
        let scope = Scope::new();
        let (_instance, container) = bound(
            "<div @ref('box')><p>existing</p></div><span @inject:tail('box')>new</span>",
            &scope,
        );

        let target = scope.get("box").and_then(|v| v.as_node().cloned()).unwrap();
        assert_eq!(container.query_selector("div"), Some(target.clone()));

        let children = target.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].tag_name().as_deref(), Some("p"));
        assert_eq!(children[1].tag_name().as_deref(), Some("span"));
        assert_eq!(children[1].text_content(), "new");
        assert!(children[1].attributes().is_empty());
    }

    #[test]
    fn test_head_injection_keeps_document_order() {
        let scope = Scope::new();
        let (_instance, container) = bound(
            "<ul @ref('list')><li>old</li></ul><li @inject:head('list')>1</li><li @inject:head('list')>2</li>",
            &scope,
        );
        let items: Vec<String> = container
            .query_selector_all("li")
            .iter()
            .map(Node::text_content)
            .collect();
        assert_eq!(items, vec!["1", "2", "old"]);
    }

    #[test]
    fn test_unresolved_injection_drops_node() {
        let scope = Scope::new();
        let (_instance, container) = bound("<p>kept</p><span @inject('nowhere')>lost</span>", &scope);
        assert!(container.query_selector("span").is_none());
        assert_eq!(container.text_content(), "kept");
    }

    #[test]
    fn test_event_handler_updates_scope() {
        let scope = Scope::from_pairs([("count", Value::observable(0))]);
        let (instance, container) = bound(
            "<button @on:click(count = count + 1)>+</button><span>@(count)</span>",
            &scope,
        );
        assert_eq!(instance.listener_count(&container), 1);

        let button = container.query_selector("button").unwrap();
        button.dispatch_event("click", Value::Null);
        button.dispatch_event("click", Value::Null);
        assert_eq!(container.query_selector("span").unwrap().text_content(), "2");
    }

    #[test]
    fn test_event_handler_function_receives_event() {
        let received = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&received);
        let scope = Scope::from_pairs([(
            "onPick",
            Value::function("onPick", move |args| {
                *sink.borrow_mut() = args.first().and_then(|e| e.property("type"));
                Ok(Value::Undefined)
            }),
        )]);
        let (_instance, container) = bound("<a @on:pick(onPick)>x</a>", &scope);
        container.query_selector("a").unwrap().dispatch_event("pick", Value::Null);
        assert_eq!(*received.borrow(), Some(Value::from("pick")));
    }

    #[test]
    fn test_listeners_follow_rebuilt_regions() {
        let scope = Scope::from_pairs([
            ("items", Value::observable(Value::array(vec![Value::from(1), Value::from(2)]))),
            ("picked", Value::observable(0)),
        ]);
        let (instance, container) = bound(
            "@for (i in items) {<button @on:click(picked = i)>@(i)</button>}",
            &scope,
        );
        assert_eq!(instance.listener_count(&container), 2);

        set(&scope, "items", Value::array(vec![Value::from(7)]));
        assert_eq!(instance.listener_count(&container), 1);
        assert_eq!(container.document().listener_count(), 1);

        container.query_selector("button").unwrap().dispatch_event("click", Value::Null);
        assert_eq!(scope.get("picked").map(|v| v.unwrapped()), Some(Value::from(7)));
    }

    #[test]
    fn test_ref_released_when_region_removed() {
        let scope = Scope::from_pairs([("open", Value::observable(true))]);
        let (_instance, _container) = bound("@if (open) {<div @ref('panel')>p</div>}", &scope);
        assert!(scope.get("panel").and_then(|v| v.as_node().cloned()).is_some());

        set(&scope, "open", Value::from(false));
        assert_eq!(scope.get("panel"), Some(Value::Null));

        set(&scope, "open", Value::from(true));
        assert!(scope.get("panel").and_then(|v| v.as_node().cloned()).is_some());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_bind_twice_and_unbind_unknown() {
        let scope = Scope::new();
        let (instance, container) = bound("<p>x</p>", &scope);
        assert!(instance.is_bound_to(&container));
        assert!(matches!(instance.bind(&container), Err(EngineError::AlreadyBound)));

        let other = host();
        assert!(matches!(instance.unbind(&other), Err(EngineError::NotBound)));
    }

    #[test]
    fn test_unbind_detaches_listeners_and_refs() {
        let scope = Scope::from_pairs([("count", Value::observable(0))]);
        let (instance, container) = bound(
            "<button @ref('btn') @on:click(count = count + 1)>+</button>",
            &scope,
        );
        let button = container.query_selector("button").unwrap();

        instance.unbind(&container).unwrap();
        assert!(!instance.is_bound());
        assert_eq!(container.document().listener_count(), 0);
        assert_eq!(scope.get("btn"), Some(Value::Null));

        button.dispatch_event("click", Value::Null);
        assert_eq!(scope.get("count").map(|v| v.unwrapped()), Some(Value::from(0)));
        // Markup stays in place.
        assert_eq!(container.text_content(), "+");
    }

    #[test]
    fn test_dispose_is_terminal() {
        let scope = Scope::from_pairs([("n", Value::observable(1))]);
        let (instance, container) = bound("@(n)", &scope);
        let n = scope.get("n").and_then(|v| v.as_observable().cloned()).unwrap();
        assert_eq!(n.subscriber_count(), 1);

        instance.dispose();
        assert!(instance.is_disposed());
        assert_eq!(n.subscriber_count(), 0);
        assert_eq!(instance.sections(), 0);

        n.set(Value::from(2));
        assert_eq!(container.text_content(), "1");
        assert!(matches!(instance.bind(&host()), Err(EngineError::Disposed)));
        instance.dispose();
    }

    #[test]
    fn test_fragment_change_listener_unsubscribes() {
        let scope = Scope::from_pairs([("n", Value::observable(0))]);
        let (instance, container) = bound("<b>@(n)</b>", &scope);
        let changes = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&changes);
        let handle = instance.on_fragment_change(move |change| {
            log.borrow_mut().push(change.container.text_content());
        });

        set(&scope, "n", Value::from(1));
        assert_eq!(*changes.borrow(), vec!["1".to_string()]);
        assert_eq!(container.text_content(), "1");

        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        set(&scope, "n", Value::from(2));
        assert_eq!(changes.borrow().len(), 1);
    }

    #[test]
    fn test_update_from_listener_converges() {
        let scope = Scope::from_pairs([("a", Value::observable(1)), ("b", Value::observable(0))]);
        let (instance, container) = bound("@(a)/@(b)", &scope);
        let b = scope.get("b").and_then(|v| v.as_observable().cloned()).unwrap();
        let a = scope.get("a").and_then(|v| v.as_observable().cloned()).unwrap();
        let mirror = a.clone();
        instance.on_fragment_change(move |_| {
            let target = mirror.read();
            if b.read() != target {
                b.set(target);
            }
        });

        a.set(Value::from(3));
        assert_eq!(container.text_content(), "3/3");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ASYNC
    // ═══════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_settle_applies_async_output() {
        let (promise, resolver) = Promise::deferred();
        let scope = Scope::from_pairs([("user", Value::from(promise))]);
        let (instance, container) = bound("<p>@(await user)</p>", &scope);
        assert_eq!(container.text_content(), "");

        resolver.resolve(Value::from("Ada"));
        instance.settle().await;
        assert_eq!(container.text_content(), "Ada");
        assert_eq!(instance.get_template(), "<p>Ada</p>");
    }

    #[tokio::test]
    async fn test_settle_keeps_latest_result() {
        let (first, resolve_first) = Promise::deferred();
        let scope = Scope::from_pairs([("data", Value::observable(Value::from(first)))]);
        let (instance, container) = bound("@(await data)", &scope);

        let (second, resolve_second) = Promise::deferred();
        set(&scope, "data", Value::from(second));

        resolve_second.resolve(Value::from("second"));
        resolve_first.resolve(Value::from("first"));
        instance.settle().await;
        assert_eq!(container.text_content(), "second");
    }
}
