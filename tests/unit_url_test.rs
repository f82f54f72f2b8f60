use fospd::core::url::Url;

#[test]
fn test_parse_simple_url() {
    let url = Url::parse("alice@example.com/notes/shopping").unwrap();
    assert_eq!(url.user(), "alice");
    assert_eq!(url.domain(), "example.com");
    assert_eq!(url.path(), ["notes", "shopping"]);
    assert!(!url.is_root());
    assert_eq!(url.basename(), Some("shopping"));
}

#[test]
fn test_parse_root_urls() {
    for raw in ["alice@example.com", "alice@example.com/", "fosp://alice@example.com/"] {
        let url = Url::parse(raw).unwrap();
        assert!(url.is_root(), "{raw} should parse as a root URL");
        assert_eq!(url.to_string(), "alice@example.com");
    }
}

#[test]
fn test_parse_normalises_path() {
    let url = Url::parse("a@b//x///y/").unwrap();
    assert_eq!(url.path(), ["x", "y"]);
    let url = Url::parse("a@b/.").unwrap();
    assert!(url.is_root());
    let url = Url::parse("a@b/x/.").unwrap();
    assert_eq!(url.path(), ["x"]);
}

#[test]
fn test_parse_errors() {
    assert!(Url::parse("no-at-sign").is_err());
    assert!(Url::parse("@example.com/x").is_err());
    assert!(Url::parse("alice@/x").is_err());
}

#[test]
fn test_wildcard() {
    let url = Url::parse("*").unwrap();
    assert!(url.is_wildcard());
    assert_eq!(url.to_string(), "*");
    assert!(!Url::parse("a@b").unwrap().is_wildcard());
}

#[test]
fn test_parent_is_idempotent_at_root() {
    let url = Url::parse("a@b/1/2").unwrap();
    let parent = url.parent();
    assert_eq!(parent.to_string(), "a@b/1");
    let root = parent.parent();
    assert!(root.is_root());
    assert_eq!(root.parent(), root);
}

#[test]
fn test_family() {
    let cases: Vec<(&str, Vec<&str>)> = vec![
        ("fosp://alice@maufl.de/", vec!["alice@maufl.de"]),
        (
            "fosp://a@b/1/2/3/4/",
            vec!["a@b/1/2/3/4", "a@b/1/2/3", "a@b/1/2", "a@b/1", "a@b"],
        ),
        ("fosp://a@b", vec!["a@b"]),
        ("fosp://a@b/.", vec!["a@b"]),
        (
            "alice@localhost.localdomain/me",
            vec!["alice@localhost.localdomain/me", "alice@localhost.localdomain"],
        ),
    ];
    for (raw, expected) in cases {
        let family = Url::parse(raw).unwrap().family();
        let rendered: Vec<String> = family.iter().map(Url::to_string).collect();
        assert_eq!(rendered, expected, "family of {raw}");
    }
}

#[test]
fn test_domain_comparison_is_case_insensitive() {
    let url = Url::parse("alice@Example.COM/x").unwrap();
    assert!(url.same_domain("example.com"));
    assert!(url.same_domain("EXAMPLE.COM"));
    // The stored domain keeps its original case.
    assert_eq!(url.domain(), "Example.COM");
}

#[test]
fn test_child_and_owner_id() {
    let root = Url::root("alice", "example.com");
    let child = root.child("notes");
    assert_eq!(child.to_string(), "alice@example.com/notes");
    assert_eq!(child.owner_id(), "alice@example.com");
}
