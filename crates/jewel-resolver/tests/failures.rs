use std::sync::Arc;

use jewel_core::config::ResolverConfig;
use jewel_core::dependency::{Dependency, SourceRef};
use jewel_core::platform::Platform;
use jewel_core::version::Version;
use jewel_resolver::candidate::SourceKind;
use jewel_resolver::conflict::ConflictCause;
use jewel_resolver::index::{IndexEntry, StaticIndex};
use jewel_resolver::resolver::{CancellationFlag, Resolver};
use jewel_resolver::source::{CandidateSource, LocalSource, LocalSpec, SourceSet};
use jewel_resolver::{resolve, ResolveError};

fn dep(s: &str) -> Dependency {
    s.parse().unwrap()
}

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn entry(version: &str) -> IndexEntry {
    IndexEntry::new(v(version), Platform::Ruby, vec![])
}

#[test]
fn failing_index_falls_through_to_the_next() {
    let mut broken = StaticIndex::new("https://broken.example");
    broken.fail_listing("rake");
    let mut good = StaticIndex::new("https://gems.example");
    good.add("rake", entry("13.1.0"));

    let mut set = SourceSet::new();
    set.add_remote(Arc::new(broken));
    set.add_remote(Arc::new(good));

    let resolution = resolve(&[dep("rake")], &set, &ResolverConfig::default()).unwrap();
    let rake = resolution.activation("rake").unwrap();
    assert_eq!(rake.version.to_string(), "13.1.0");
    assert_eq!(rake.candidates[0].source().to_string(), "remote https://gems.example");
}

#[test]
fn fetch_failure_is_reported_when_nothing_else_remains() {
    let mut broken = StaticIndex::new("https://broken.example");
    broken.fail_listing("rake");
    let mut set = SourceSet::new();
    set.add_remote(Arc::new(broken));

    let err = resolve(&[dep("rake")], &set, &ResolverConfig::default()).unwrap_err();
    let report = err.report().unwrap();
    let ConflictCause::FetchFailed(message) = &report.conflicts[0].cause else {
        panic!("expected a fetch failure, got {:?}", report.conflicts[0].cause);
    };
    assert!(message.contains("https://broken.example is unreachable"));
    assert!(report
        .to_string()
        .contains("Metadata for rake could not be fetched"));
}

#[test]
fn unfetchable_version_falls_back_to_older() {
    let mut index = StaticIndex::new("https://gems.example").lazy();
    index.add("rake", entry("13.1.0")).add("rake", entry("13.0.6"));
    index.fail_spec("rake", v("13.1.0"));
    let index = Arc::new(index);
    let mut set = SourceSet::new();
    set.add_remote(index.clone());

    let resolution = resolve(&[dep("rake")], &set, &ResolverConfig::default()).unwrap();
    assert_eq!(resolution.version_of("rake").unwrap().to_string(), "13.0.6");
    assert!(index.spec_calls() >= 2);
}

#[test]
fn cancellation_aborts_before_the_next_decision() {
    let mut index = StaticIndex::new("https://gems.example");
    index.add("rake", entry("13.1.0"));
    let mut set = SourceSet::new();
    set.add_remote(Arc::new(index));

    let root = [dep("rake")];
    let config = ResolverConfig::default();
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let err = Resolver::new(&root, &set, &config)
        .unwrap()
        .with_cancellation(cancel)
        .run()
        .unwrap_err();
    assert!(matches!(err, ResolveError::Aborted));
}

#[test]
fn unregistered_pinned_source_is_refused() {
    let set = SourceSet::new();
    let root = [dep("mylib").with_source(SourceRef::Path("vendor/mylib".into()))];
    let err = resolve(&root, &set, &ResolverConfig::default()).unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(
        report.conflicts[0].cause,
        ConflictCause::UnknownSource("path vendor/mylib".to_string())
    );
    assert!(report
        .to_string()
        .contains("The source path vendor/mylib is not configured"));
}

#[test]
fn pinned_source_wins_over_remote() {
    let pin = SourceRef::Git {
        uri: "https://github.com/acme/mylib".to_string(),
        reference: Some("main".to_string()),
    };
    let mut pinned = LocalSource::pinned(&pin);
    pinned.add("mylib", LocalSpec::new(v("0.9.0"), vec![dep("rake (>= 13)")]));

    let mut index = StaticIndex::new("https://gems.example");
    index
        .add("mylib", entry("1.0.0"))
        .add("rake", entry("13.1.0"));

    let mut set = SourceSet::new();
    set.add_remote(Arc::new(index));
    set.add(CandidateSource::Pinned(pinned));

    let root = [dep("mylib").with_source(pin)];
    let resolution = resolve(&root, &set, &ResolverConfig::default()).unwrap();
    let mylib = resolution.activation("mylib").unwrap();
    assert_eq!(mylib.version.to_string(), "0.9.0");
    assert_eq!(mylib.candidates[0].source().kind, SourceKind::Pinned);
    assert_eq!(resolution.version_of("rake").unwrap().to_string(), "13.1.0");
}

fn vendored(path: &str) -> (SourceRef, CandidateSource) {
    let pin = SourceRef::Path(path.into());
    let mut source = LocalSource::pinned(&pin);
    source.add("mylib", LocalSpec::new(v("1.0.0"), vec![]));
    (pin, CandidateSource::Pinned(source))
}

#[test]
fn conflicting_pins_on_one_name_are_refused() {
    let (one, one_source) = vendored("vendor/one");
    let (two, two_source) = vendored("vendor/two");
    let mut set = SourceSet::new();
    set.add(one_source);
    set.add(two_source);

    let root = [
        dep("mylib").with_source(one.clone()),
        dep("mylib").with_source(two),
    ];
    let err = resolve(&root, &set, &ResolverConfig::default()).unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(
        report.conflicts[0].cause,
        ConflictCause::SourceMismatch(vec![
            "path vendor/one".to_string(),
            "path vendor/two".to_string(),
        ])
    );
    assert!(report
        .to_string()
        .contains("pinned to different sources: path vendor/one, path vendor/two"));

    // The same pin twice is fine.
    let root = [
        dep("mylib").with_source(one.clone()),
        dep("mylib (>= 1.0)").with_source(one),
    ];
    let resolution = resolve(&root, &set, &ResolverConfig::default()).unwrap();
    let mylib = resolution.activation("mylib").unwrap();
    assert_eq!(mylib.candidates[0].source().to_string(), "path vendor/one");
}

#[test]
fn pin_arriving_after_binding_must_match() {
    let (one, one_source) = vendored("vendor/one");
    let (two, two_source) = vendored("vendor/two");
    let mut app = LocalSource::installed();
    app.add(
        "app",
        LocalSpec::new(v("1.0"), vec![dep("mylib").with_source(two)]),
    );
    let mut set = SourceSet::new();
    set.add(one_source);
    set.add(two_source);
    set.add(CandidateSource::Installed(app));

    let root = [dep("mylib").with_source(one), dep("app")];
    let err = resolve(&root, &set, &ResolverConfig::default()).unwrap_err();
    assert_eq!(err.report().unwrap().conflicts[0].name, "mylib");
}

#[test]
fn installed_build_shadows_newer_remote_one() {
    let mut installed = LocalSource::installed();
    installed.add("rake", LocalSpec::new(v("13.0.6"), vec![]));
    let mut index = StaticIndex::new("https://gems.example");
    index.add("rake", entry("13.1.0"));

    let mut set = SourceSet::new();
    set.add_remote(Arc::new(index));
    set.add(CandidateSource::Installed(installed));

    let resolution = resolve(&[dep("rake")], &set, &ResolverConfig::default()).unwrap();
    let rake = resolution.activation("rake").unwrap();
    assert_eq!(rake.version.to_string(), "13.0.6");
    assert_eq!(rake.candidates[0].source().kind, SourceKind::Installed);

    // Asking for something the installed set cannot give goes to the remote.
    let resolution = resolve(&[dep("rake (>= 13.1)")], &set, &ResolverConfig::default()).unwrap();
    assert_eq!(resolution.version_of("rake").unwrap().to_string(), "13.1.0");
}

#[test]
fn empty_platform_list_is_a_configuration_error() {
    let set = SourceSet::new();
    let config = ResolverConfig {
        platforms: vec![],
        ..ResolverConfig::default()
    };
    let err = resolve(&[dep("rake")], &set, &config).unwrap_err();
    assert!(matches!(err, ResolveError::Config(_)));
}
