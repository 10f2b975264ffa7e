//! Registration, removal, pause and fire behaviour of the event bus

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use annex_common::{try_init_logging, LogConfig};
use annex_dom::{Document, DomEvent, Node};
use annex_events::{EventBus, EventError, EventRef, Handler, ListenOptions, TargetItem, Targets};
use serde_json::json;

type Dom = Rc<Node>;

const PAGE: &str = r#"<html><body>
    <div id="panel">
        <ul id="list">
            <li id="first" class="sel">one</li>
            <li id="second">two</li>
        </ul>
        <form id="form"><button id="submit">go</button></form>
    </div>
</body></html>"#;

fn setup() -> (Document, EventBus<Dom>) {
    let _ = try_init_logging(LogConfig::test());
    let doc = Document::parse_html(PAGE).unwrap();
    (doc, EventBus::new())
}

fn by_id(doc: &Document, id: &str) -> Dom {
    doc.get_element_by_id(id).unwrap()
}

fn counter() -> (Rc<Cell<usize>>, Handler<Dom>) {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    (count, Handler::new(move |_| c.set(c.get() + 1)))
}

fn click(node: &Dom) {
    node.dispatch_event(&DomEvent::generic("click", true, true));
}

#[test]
fn test_remover_restores_previous_state() {
    let (doc, bus) = setup();
    let panel = by_id(&doc, "panel");
    let (_, existing) = counter();
    bus.on(&panel, "keyup", existing, ListenOptions::default()).unwrap();
    let before = bus.snapshot();

    let (_, handler) = counter();
    let remover = bus
        .on(&panel, "evt.ns", handler, ListenOptions::default())
        .unwrap()
        .unwrap();
    assert_ne!(bus.snapshot(), before);
    assert_eq!(panel.event_target.listener_count("evt"), 1);

    assert_eq!(remover.remove().unwrap(), 1);
    assert_eq!(bus.snapshot(), before);
    assert_eq!(panel.event_target.listener_count("evt"), 0);
    assert_eq!(remover.remove().unwrap(), 0);
}

#[test]
fn test_one_native_listener_per_target_and_event() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    for spec in ["click.a", "click.b", "click"] {
        let (_, handler) = counter();
        bus.on(&list, spec, handler, ListenOptions::default()).unwrap();
    }
    let (_, delegated) = counter();
    bus.on((&list, "li"), "click.c", delegated, ListenOptions::default())
        .unwrap();

    assert_eq!(bus.handler_count(), 4);
    assert_eq!(list.event_target.listener_count("click"), 1);
    assert_eq!(bus.listener_binding_count(), 1);

    assert_eq!(bus.off(&list, "click", None).unwrap(), 4);
    assert_eq!(list.event_target.listener_count("click"), 0);
    assert_eq!(bus.listener_binding_count(), 0);
}

#[test]
fn test_pause_suppresses_without_removing() {
    let (doc, bus) = setup();
    let button = by_id(&doc, "submit");
    let (count, handler) = counter();
    bus.on(&button, "click", handler, ListenOptions::default()).unwrap();

    assert_eq!(bus.pause(&button, "click", None).unwrap(), 1);
    click(&button);
    assert_eq!(count.get(), 0);
    assert_eq!(bus.handler_count(), 1);

    assert_eq!(bus.resume(&button, "click", None).unwrap(), 1);
    click(&button);
    assert_eq!(count.get(), 1);
    assert_eq!(bus.handler_count(), 1);
}

#[test]
fn test_pause_is_visible_in_snapshot() {
    let (doc, bus) = setup();
    let form = by_id(&doc, "form");
    let (_, handler) = counter();
    bus.on(&form, "submit.checkout", handler.clone(), ListenOptions::default())
        .unwrap();

    bus.set_paused(&form, ".checkout", Some(&handler), true).unwrap();
    let snapshot = bus.snapshot();
    let target = snapshot.targets.values().next().unwrap();
    assert!(target.namespaces["checkout"]["submit"].handlers[0].paused);

    // A pause that matches nothing changes nothing.
    assert_eq!(bus.pause(&form, "*.other", None).unwrap(), 0);
    assert_eq!(bus.snapshot(), snapshot);
}

#[test]
fn test_once_runs_exactly_once() {
    let (doc, bus) = setup();
    let button = by_id(&doc, "submit");
    let (count, handler) = counter();
    bus.once(&button, "click", handler, ListenOptions::default())
        .unwrap();

    click(&button);
    assert!(!bus.is_registered(&button));
    click(&button);
    assert_eq!(count.get(), 1);
    assert_eq!(button.event_target.listener_count("click"), 0);
}

#[test]
fn test_once_option_matches_once_method() {
    let (doc, bus) = setup();
    let button = by_id(&doc, "submit");
    let (count, handler) = counter();
    let remover = bus
        .on(&button, "click", handler, ListenOptions::once())
        .unwrap()
        .unwrap();

    click(&button);
    click(&button);
    assert_eq!(count.get(), 1);
    assert_eq!(remover.remove().unwrap(), 0);
}

#[test]
fn test_delegation_matches_selector() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let handler = Handler::<Dom>::new(move |e| {
        let delegate = e.delegate_target.as_ref().and_then(|d| d.get_attribute("id"));
        let current = e.current_target.get_attribute("id");
        s.borrow_mut().push((delegate, current));
    });
    bus.on((&list, ".sel"), "click", handler, ListenOptions::default())
        .unwrap();

    click(&by_id(&doc, "first"));
    click(&by_id(&doc, "second"));
    click(&list);

    assert_eq!(
        *seen.borrow(),
        vec![(Some("first".to_string()), Some("list".to_string()))]
    );
}

#[test]
fn test_once_on_delegation_waits_for_a_match() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let (count, handler) = counter();
    bus.once((&list, ".sel"), "click", handler, ListenOptions::default())
        .unwrap();

    click(&by_id(&doc, "second"));
    assert_eq!(count.get(), 0);
    assert!(bus.is_registered(&list));

    let first = by_id(&doc, "first");
    click(&first);
    click(&first);
    assert_eq!(count.get(), 1);
    assert!(!bus.is_registered(&list));
    assert_eq!(list.event_target.listener_count("click"), 0);
}

#[test]
fn test_pause_through_delegation_leaves_direct_handler() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let first = by_id(&doc, "first");
    let (direct_count, direct) = counter();
    let (delegated_count, delegated) = counter();
    bus.on(&list, "click", direct, ListenOptions::default()).unwrap();
    bus.on((&list, ".sel"), "click", delegated, ListenOptions::default())
        .unwrap();

    assert_eq!(bus.pause((&list, ".sel"), "click", None).unwrap(), 1);
    click(&first);
    assert_eq!(direct_count.get(), 1);
    assert_eq!(delegated_count.get(), 0);

    assert_eq!(bus.resume((&list, ".sel"), "click", None).unwrap(), 1);
    click(&first);
    assert_eq!(direct_count.get(), 2);
    assert_eq!(delegated_count.get(), 1);
}

#[test]
fn test_flat_list_with_two_delegations() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let form = by_id(&doc, "form");
    let (count, handler) = counter();
    let targets = || Targets::new().delegate(list.clone(), "li").delegate(form.clone(), "button");

    let remover = bus
        .on(targets(), "click", handler, ListenOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(remover.registrations(), 2);

    click(&by_id(&doc, "second"));
    click(&by_id(&doc, "submit"));
    click(&form);
    assert_eq!(count.get(), 2);

    assert_eq!(bus.off(targets(), "click", None).unwrap(), 2);
    assert_eq!(bus.target_count(), 0);
}

#[test]
fn test_wildcard_removal() {
    let (doc, bus) = setup();
    let panel = by_id(&doc, "panel");
    let register = || {
        for spec in ["evt.ns1", "evt.ns2", "evt.ns3"] {
            let (_, handler) = counter();
            bus.on(&panel, spec, handler, ListenOptions::default()).unwrap();
        }
    };

    register();
    assert_eq!(bus.off(&panel, "evt", None).unwrap(), 3);
    assert_eq!(bus.handler_count(), 0);

    register();
    assert_eq!(bus.off(&panel, "*.ns1", None).unwrap(), 1);
    assert_eq!(bus.handler_count(), 2);
    assert_eq!(bus.off(&panel, ".ns2", None).unwrap(), 1);
    assert_eq!(bus.off(&panel, "*", None).unwrap(), 1);
}

#[test]
fn test_off_by_handler_identity() {
    let (doc, bus) = setup();
    let panel = by_id(&doc, "panel");
    let (first_count, first) = counter();
    let (second_count, second) = counter();
    bus.on(&panel, "click", first.clone(), ListenOptions::default()).unwrap();
    bus.on(&panel, "click", second, ListenOptions::default()).unwrap();

    assert_eq!(bus.off(&panel, "click", Some(&first)).unwrap(), 1);
    assert_eq!(bus.off(&panel, "click", Some(&first)).unwrap(), 0);
    click(&panel);
    assert_eq!(first_count.get(), 0);
    assert_eq!(second_count.get(), 1);
}

#[test]
fn test_off_with_selector_only_touches_that_delegation() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let (direct_count, direct) = counter();
    let (_, delegated) = counter();
    bus.on(&list, "click", direct, ListenOptions::default()).unwrap();
    bus.on((&list, "li"), "click", delegated, ListenOptions::default())
        .unwrap();

    assert_eq!(bus.off((&list, "li"), "click", None).unwrap(), 1);
    click(&by_id(&doc, "first"));
    assert_eq!(direct_count.get(), 1);
    assert_eq!(bus.off(&list, "click", None).unwrap(), 1);
}

#[test]
fn test_cleanup_leaves_no_placeholder() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let (_, handler) = counter();
    bus.on((&list, "li"), "click.menu", handler, ListenOptions::default())
        .unwrap();
    assert!(bus.is_registered(&list));

    assert_eq!(bus.off(&list, "click", None).unwrap(), 1);
    assert!(!bus.is_registered(&list));
    assert_eq!(bus.target_count(), 0);
    assert!(bus.snapshot().is_empty());

    // Idempotent.
    bus.clean_up(None);
    bus.clean_up(Some(Targets::from(&list)));
    assert!(bus.snapshot().is_empty());
}

#[test]
fn test_example_scenario() {
    let (doc, bus) = setup();
    let div = by_id(&doc, "panel");
    let (h1_count, h1) = counter();
    let (h2_count, h2) = counter();
    bus.on(&div, "click.foo", h1, ListenOptions::default()).unwrap();
    bus.on(&div, "click.bar", h2, ListenOptions::default()).unwrap();

    click(&div);
    assert_eq!((h1_count.get(), h2_count.get()), (1, 1));

    assert_eq!(bus.off(&div, "*.foo", None).unwrap(), 1);
    click(&div);
    assert_eq!((h1_count.get(), h2_count.get()), (1, 2));

    assert_eq!(bus.off(&div, "*", None).unwrap(), 1);
    assert!(!bus.is_registered(&div));
}

#[test]
fn test_validation_fails_without_side_effects() {
    let (doc, bus) = setup();
    let panel = by_id(&doc, "panel");
    let (_, handler) = counter();

    let blank_selector: Targets<Dom> = vec![
        TargetItem::Node(panel.clone()),
        TargetItem::Selector("  ".into()),
    ]
    .into();
    assert!(matches!(
        bus.on(blank_selector, "click", handler.clone(), ListenOptions::default()),
        Err(EventError::InvalidTarget(_))
    ));

    let orphan_selector = Targets::new().node(panel.clone()).selector("li").selector("a");
    assert!(matches!(
        bus.on(orphan_selector, "click", handler.clone(), ListenOptions::default()),
        Err(EventError::InvalidDelegation(_))
    ));

    // One good and one bad specifier: nothing is registered.
    assert!(matches!(
        bus.on(&panel, vec!["click", "*.ns"], handler.clone(), ListenOptions::default()),
        Err(EventError::InvalidArgument(_))
    ));
    assert!(matches!(
        bus.on(&panel, "   ", handler, ListenOptions::default()),
        Err(EventError::InvalidArgument(_))
    ));
    assert!(matches!(
        bus.off(Targets::<Dom>::new(), "click", None),
        Err(EventError::InvalidArgument(_))
    ));

    assert_eq!(bus.handler_count(), 0);
    assert_eq!(panel.event_target.total_listener_count(), 0);
}

#[test]
fn test_multiple_specifiers_in_one_string() {
    let (doc, bus) = setup();
    let form = by_id(&doc, "form");
    let (_, handler) = counter();
    let remover = bus
        .on(&form, "submit.checkout reset", handler, ListenOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(remover.registrations(), 2);
    assert_eq!(bus.off(&form, ["submit", "reset.__default"], None).unwrap(), 2);
}

#[test]
fn test_fire_invokes_registry_directly() {
    let (doc, bus) = setup();
    let panel = by_id(&doc, "panel");
    let details = Rc::new(RefCell::new(Vec::new()));
    let d = details.clone();
    let recording = Handler::<Dom>::new(move |e| {
        assert!(e.is_synthetic());
        d.borrow_mut()
            .push((e.namespace.to_string(), e.detail().cloned()));
    });
    let (paused_count, paused) = counter();
    bus.on(&panel, "save.a", recording, ListenOptions::default()).unwrap();
    bus.on(&panel, "save.b", paused.clone(), ListenOptions::default()).unwrap();
    bus.pause(&panel, "save", Some(&paused)).unwrap();

    assert_eq!(bus.fire(&panel, "save", Some(json!({"dirty": true}))).unwrap(), 1);
    assert_eq!(paused_count.get(), 0);
    assert_eq!(
        *details.borrow(),
        vec![("a".to_string(), Some(json!({"dirty": true})))]
    );
    assert_eq!(bus.fire(&panel, "missing", None).unwrap(), 0);
}

#[test]
fn test_fire_on_delegation_pair() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let delegated = Handler::<Dom>::new(move |e| {
        let EventRef::Synthetic(event) = e.event else {
            return;
        };
        let (target, selector) = event.synthetic_target.elements();
        s.borrow_mut()
            .push((target.get_attribute("id"), selector.map(str::to_string), event.bubbles));
    });
    let (direct_count, direct) = counter();
    bus.on((&list, "li"), "pick", delegated, ListenOptions::default())
        .unwrap();
    bus.on(&list, "pick", direct, ListenOptions::default()).unwrap();

    // Synthetic events skip the selector match.
    assert_eq!(bus.fire((&list, "li"), "pick", None).unwrap(), 1);
    assert_eq!(direct_count.get(), 0);
    assert_eq!(
        *seen.borrow(),
        vec![(Some("list".to_string()), Some("li".to_string()), false)]
    );

    assert_eq!(bus.fire(&list, "pick", None).unwrap(), 2);
    assert_eq!(seen.borrow()[1], (Some("list".to_string()), None, false));
    assert_eq!(direct_count.get(), 1);
}

#[test]
fn test_snapshot_serializes() {
    let (doc, bus) = setup();
    let list = by_id(&doc, "list");
    let (_, handler) = counter();
    bus.on((&list, "li"), "click.menu", handler.clone(), ListenOptions::default())
        .unwrap();
    bus.on(&list, "click.menu", handler, ListenOptions::capture()).unwrap();

    let json = bus.snapshot().to_json();
    let scope = &json["targets"][format!("{:?}", list.id)]["namespaces"]["menu"]["click"];
    assert_eq!(scope["handlers"].as_array().unwrap().len(), 1);
    assert_eq!(scope["handlers"][0]["capture"], json!(true));
    assert_eq!(scope["delegations"]["li"][0]["paused"], json!(false));
}
