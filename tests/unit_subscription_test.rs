use fospd::core::object::{Event, Object, Subscription};
use fospd::core::url::Url;

fn subscribed(events: &[Event], depth: i64) -> Subscription {
    Subscription {
        depth,
        events: events.to_vec(),
    }
}

fn object_at(url: &str) -> Object {
    Object {
        url: Url::parse(url).unwrap(),
        ..Object::default()
    }
}

/// Builds root → ... → leaf and returns the leaf.
fn with_parents(mut objects: Vec<Object>) -> Object {
    let mut iter = objects.drain(..);
    let mut current = iter.next().expect("at least a root");
    for mut object in iter {
        object.parent = Some(Box::new(current));
        current = object;
    }
    current
}

#[test]
fn test_covers() {
    let subscription = subscribed(&[Event::Updated], 2);
    assert!(subscription.covers(Event::Updated, 0));
    assert!(subscription.covers(Event::Updated, 2));
    assert!(!subscription.covers(Event::Updated, 3));
    assert!(!subscription.covers(Event::Created, 1));

    let unbounded = subscribed(&[Event::Deleted], -1);
    assert!(unbounded.covers(Event::Deleted, 1000));
}

#[test]
fn test_subscribed_users_climbs_the_parent_chain() {
    let mut root = object_at("a@b");
    root.subscriptions.insert(
        "alice@b".to_string(),
        subscribed(&[Event::Updated], -1),
    );
    let mut middle = object_at("a@b/x");
    middle
        .subscriptions
        .insert("bob@b".to_string(), subscribed(&[Event::Updated], 0));
    let leaf = object_at("a@b/x/y");
    let object = with_parents(vec![root, middle, leaf]);

    // The event happens at the leaf: alice subscribed unbounded at the
    // root (distance 2), bob at distance 1 with depth 0 and misses it.
    let users = object.subscribed_users(Event::Updated, 0);
    assert_eq!(users, ["alice@b"]);
}

#[test]
fn test_subscribed_users_depth_boundary() {
    let mut root = object_at("a@b");
    root.subscriptions
        .insert("alice@b".to_string(), subscribed(&[Event::Created], 1));
    let child = object_at("a@b/x");
    let object = with_parents(vec![root, child]);

    // Distance from the root is exactly the allowed depth.
    assert_eq!(object.subscribed_users(Event::Created, 0), ["alice@b"]);

    let mut root = object_at("a@b");
    root.subscriptions
        .insert("alice@b".to_string(), subscribed(&[Event::Created], 1));
    let child = object_at("a@b/x");
    let grandchild = object_at("a@b/x/y");
    let object = with_parents(vec![root, child, grandchild]);
    assert!(object.subscribed_users(Event::Created, 0).is_empty());
}

#[test]
fn test_subscribed_users_filters_by_event() {
    let mut root = object_at("a@b");
    root.subscriptions
        .insert("alice@b".to_string(), subscribed(&[Event::Deleted], -1));
    assert!(root.subscribed_users(Event::Updated, 0).is_empty());
    assert_eq!(root.subscribed_users(Event::Deleted, 0), ["alice@b"]);
}

#[test]
fn test_subscribed_users_deduplicates_ancestors_first() {
    let mut root = object_at("a@b");
    root.subscriptions
        .insert("alice@b".to_string(), subscribed(&[Event::Updated], -1));
    let mut leaf = object_at("a@b/x");
    leaf.subscriptions
        .insert("alice@b".to_string(), subscribed(&[Event::Updated], 0));
    leaf.subscriptions
        .insert("bob@b".to_string(), subscribed(&[Event::Updated], 0));
    let object = with_parents(vec![root, leaf]);

    let users = object.subscribed_users(Event::Updated, 0);
    assert_eq!(users, ["alice@b", "bob@b"]);
}

#[test]
fn test_event_parsing_is_case_insensitive() {
    assert_eq!("updated".parse::<Event>().unwrap(), Event::Updated);
    assert_eq!("UPDATED".parse::<Event>().unwrap(), Event::Updated);
    assert_eq!(Event::Created.as_keyword(), "CREATED");
    assert!("renamed".parse::<Event>().is_err());
}
