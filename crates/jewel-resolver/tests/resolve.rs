use std::sync::Arc;

use jewel_core::config::ResolverConfig;
use jewel_core::dependency::Dependency;
use jewel_core::lockfile::{LockedPackage, Lockfile};
use jewel_core::platform::Platform;
use jewel_core::version::Version;
use jewel_resolver::conflict::ConflictCause;
use jewel_resolver::index::{IndexEntry, StaticIndex};
use jewel_resolver::resolver::{Phase, Resolver};
use jewel_resolver::source::SourceSet;
use jewel_resolver::{resolve, Resolution, ResolveError};

fn dep(s: &str) -> Dependency {
    s.parse().unwrap()
}

fn index(specs: &[(&str, &str, &[&str])]) -> StaticIndex {
    let mut index = StaticIndex::new("https://gems.example");
    for (name, version, deps) in specs {
        index.add(
            name,
            IndexEntry::new(
                Version::parse(version).unwrap(),
                Platform::Ruby,
                deps.iter().map(|d| dep(d)).collect(),
            ),
        );
    }
    index
}

fn sources(specs: &[(&str, &str, &[&str])]) -> SourceSet {
    let mut set = SourceSet::new();
    set.add_remote(Arc::new(index(specs)));
    set
}

fn lock(entries: &[(&str, &str)]) -> Lockfile {
    Lockfile {
        package: entries
            .iter()
            .map(|(name, version)| LockedPackage {
                name: name.to_string(),
                version: Version::parse(version).unwrap(),
                platform: Platform::Ruby,
                source: None,
                dependencies: vec![],
            })
            .collect(),
    }
}

fn version(resolution: &Resolution, name: &str) -> String {
    resolution.version_of(name).unwrap().to_string()
}

/// Every declared runtime dependency of every activated build is met.
fn assert_sound(resolution: &Resolution) {
    for candidate in resolution.all_activated() {
        for dependency in candidate.dependencies.iter().filter(|d| d.is_runtime()) {
            let bound = resolution
                .version_of(&dependency.name)
                .unwrap_or_else(|| panic!("{dependency} of {candidate} is not activated"));
            assert!(
                dependency.constraint.satisfied_by(bound),
                "{dependency} of {candidate} resolved to {bound}"
            );
        }
    }
}

/// Step to a terminal phase, keeping the resolver for inspection.
fn drive(resolver: &mut Resolver<'_>) -> Vec<Phase> {
    let mut phases = Vec::new();
    loop {
        let phase = resolver.step().unwrap();
        phases.push(phase);
        if phase.is_terminal() {
            return phases;
        }
    }
}

fn ab_index() -> SourceSet {
    sources(&[
        ("a", "1.0", &["b (< 2.0)"]),
        ("a", "2.0", &["b (>= 2.0)"]),
        ("b", "2.5", &[]),
    ])
}

#[test]
fn backjumps_past_failed_choice() {
    let mut set = ab_index();
    // Locking a at 1.0 makes it the first candidate tried.
    set.with_lockfile(&lock(&[("a", "1.0")])).unwrap();
    let config = ResolverConfig::default();
    let root = [dep("a (>= 1.0)")];

    let mut resolver = Resolver::new(&root, &set, &config).unwrap();
    let phases = drive(&mut resolver);
    assert!(phases.contains(&Phase::Conflict));
    assert!(phases.contains(&Phase::Backjumping));
    assert_eq!(phases.last(), Some(&Phase::Satisfied));

    let resolution = resolve(&root, &set, &config).unwrap();
    assert_eq!(version(&resolution, "a"), "2.0");
    assert_eq!(version(&resolution, "b"), "2.5");
    assert_sound(&resolution);
}

#[test]
fn newest_first_needs_no_backjump() {
    let set = ab_index();
    let root = [dep("a (>= 1.0)")];
    let resolution = resolve(&root, &set, &ResolverConfig::default()).unwrap();
    assert_eq!(version(&resolution, "a"), "2.0");
    assert_eq!(version(&resolution, "b"), "2.5");
}

#[test]
fn backjump_skips_unrelated_decisions() {
    let mut set = sources(&[
        ("a", "1.0", &["b (< 2.0)"]),
        ("a", "2.0", &["b (>= 2.0)"]),
        ("b", "2.5", &[]),
        ("m", "1.0", &[]),
        ("m", "2.0", &[]),
    ]);
    set.with_lockfile(&lock(&[("a", "1.0")])).unwrap();
    let config = ResolverConfig::default();
    let root = [dep("a (>= 1.0)"), dep("m (>= 1.0)")];

    let mut resolver = Resolver::new(&root, &set, &config).unwrap();
    drive(&mut resolver);
    // m was decided between a and the failing b, but never blamed: only the
    // b failure is recorded, no exhaustion of m.
    let conflicts = resolver.tracker().conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].name, "b");
    assert_eq!(conflicts[0].cause, ConflictCause::NoCandidate);

    let resolution = resolve(&root, &set, &config).unwrap();
    assert_eq!(version(&resolution, "a"), "2.0");
    assert_eq!(version(&resolution, "m"), "2.0");
}

#[test]
fn incompatible_requirements_name_both_requesters() {
    let set = sources(&[
        ("x", "1.0", &["z (>= 2.0)"]),
        ("y", "1.0", &["z (< 2.0)"]),
        ("z", "1.0", &[]),
        ("z", "2.0", &[]),
    ]);
    let root = [dep("x (= 1.0)"), dep("y (= 1.0)")];
    let err = resolve(&root, &set, &ResolverConfig::default()).unwrap_err();

    let report = err.report().expect("unsatisfiable");
    let names = report.involved_names();
    assert!(names.contains("x"));
    assert!(names.contains("y"));
    assert!(names.contains("z"));

    let text = report.to_string();
    assert!(text.contains("x (= 1.0) was resolved to 1.0, which depends on"));
    assert!(text.contains("y (= 1.0) was resolved to 1.0, which depends on"));
    assert!(text.contains("z (>= 2.0)"));
    assert!(text.contains("z (< 2.0)"));
}

#[test]
fn conflict_blames_only_activated_candidates() {
    let set = sources(&[
        ("x", "1.0", &["z (>= 2.0)"]),
        ("y", "1.0", &["z (< 2.0)"]),
        ("z", "1.5", &[]),
        ("z", "2.5", &[]),
    ]);
    let root = [dep("x (= 1.0)"), dep("y (= 1.0)")];
    let err = resolve(&root, &set, &ResolverConfig::default()).unwrap_err();
    let report = err.report().unwrap();
    for conflict in &report.conflicts {
        for requirement in &conflict.requester_chain {
            if let jewel_resolver::requirement::Requester::Package(activation) =
                &requirement.requester
            {
                assert!(["x", "y", "z"].contains(&activation.name.as_str()));
                assert_eq!(activation.version.to_string(), "1.0");
            }
        }
    }
}

#[test]
fn missing_package_is_unsatisfiable() {
    let set = sources(&[("a", "1.0", &["ghost (>= 1)"])]);
    let err = resolve(&[dep("a")], &set, &ResolverConfig::default()).unwrap_err();
    assert!(err.is_unsatisfiable());
    let report = err.report().unwrap();
    assert_eq!(report.conflicts[0].name, "ghost");
    assert_eq!(report.conflicts[0].cause, ConflictCause::NoCandidate);
    assert!(report.to_string().contains("No version of ghost matches >= 1"));
}

#[test]
fn resolution_is_deterministic() {
    let specs: &[(&str, &str, &[&str])] = &[
        ("rails", "7.1.3", &["actionpack (= 7.1.3)", "railties (= 7.1.3)"]),
        ("actionpack", "7.1.3", &["rack (>= 2.2.4)", "rack-test (>= 0.6.3)"]),
        ("railties", "7.1.3", &["actionpack (= 7.1.3)", "thor (~> 1.0)"]),
        ("rack", "2.2.8", &[]),
        ("rack", "3.0.9", &[]),
        ("rack-test", "2.1.0", &["rack (>= 1.3)"]),
        ("thor", "1.3.0", &[]),
        ("thor", "0.20.3", &[]),
    ];
    let root = [dep("rails (~> 7.1)"), dep("rack (< 3)")];
    let config = ResolverConfig::default();

    let first = resolve(&root, &sources(specs), &config).unwrap();
    let second = resolve(&root, &sources(specs), &config).unwrap();
    assert_eq!(first.all_activated(), second.all_activated());
    let names: Vec<String> = first
        .all_activated()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(names, ["actionpack", "rack", "rack-test", "rails", "railties", "thor"]);
    assert_eq!(version(&first, "rack"), "2.2.8");
    assert_eq!(version(&first, "thor"), "1.3.0");
    assert_sound(&first);
}

#[test]
fn shared_requirements_are_merged() {
    let set = sources(&[
        ("a", "1.0", &["c (>= 1.0)"]),
        ("b", "1.0", &["c (< 1.5)"]),
        ("c", "1.0", &[]),
        ("c", "1.4", &[]),
        ("c", "2.0", &[]),
    ]);
    let resolution = resolve(&[dep("a"), dep("b")], &set, &ResolverConfig::default()).unwrap();
    assert_eq!(version(&resolution, "c"), "1.4");
    assert_sound(&resolution);
}

#[test]
fn cycles_terminate() {
    let set = sources(&[("a", "1.0", &["b (>= 1)"]), ("b", "1.0", &["a (>= 1)"])]);
    let resolution = resolve(&[dep("a")], &set, &ResolverConfig::default()).unwrap();
    assert_eq!(resolution.len(), 2);
    assert_sound(&resolution);
}

#[test]
fn prereleases_need_opt_in() {
    let set = sources(&[("a", "1.0", &[]), ("a", "2.0.beta1", &[])]);
    let stable = resolve(&[dep("a")], &set, &ResolverConfig::default()).unwrap();
    assert_eq!(version(&stable, "a"), "1.0");

    let named = resolve(&[dep("a (>= 2.0.beta1)")], &set, &ResolverConfig::default()).unwrap();
    assert_eq!(version(&named, "a"), "2.0.beta1");

    let err = resolve(&[dep("a (>= 2.0.a)")], &sources(&[("a", "1.0", &[])]), &ResolverConfig::default())
        .unwrap_err();
    assert!(err.is_unsatisfiable());
}

#[test]
fn runtime_packages_come_from_config() {
    let mut config = ResolverConfig::default();
    config
        .runtime
        .insert("ruby".to_string(), Version::parse("3.2.2").unwrap());
    let mut set = SourceSet::from_config(&config);
    set.add_remote(Arc::new(index(&[
        ("modern", "2.0", &["ruby (>= 3.3)"]),
        ("modern", "1.0", &["ruby (>= 3.0)"]),
    ])));

    let resolution = resolve(&[dep("modern")], &set, &config).unwrap();
    assert_eq!(version(&resolution, "modern"), "1.0");
    assert_eq!(version(&resolution, "ruby"), "3.2.2");
}

#[test]
fn graph_reflects_resolution() {
    let set = sources(&[
        ("rails", "7.1.3", &["rack (>= 2.2.4)"]),
        ("rack", "3.0.9", &[]),
        ("puma", "6.4.2", &["rack (>= 2)"]),
    ]);
    let resolution = resolve(&[dep("rails"), dep("puma")], &set, &ResolverConfig::default()).unwrap();
    let graph = resolution.graph();
    assert_eq!(graph.len(), 3);
    let path = graph.find_path("rack").unwrap();
    assert_eq!(path.len(), 3);
    let inverted = graph.print_inverted_tree("rack");
    assert!(inverted.contains("puma (6.4.2) requires >= 2"));
    assert!(inverted.contains("rails (7.1.3) requires >= 2.2.4"));
}

#[test]
fn error_is_a_diagnostic() {
    let set = sources(&[]);
    let err = resolve(&[dep("nothing")], &set, &ResolverConfig::default()).unwrap_err();
    assert!(matches!(err, ResolveError::Unsatisfiable { .. }));
    let report: miette::Report = err.into();
    assert!(report.to_string().starts_with("Could not resolve dependencies."));
}
