use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_acquire::config::{Config, ConfigLoader, FetchTool};
use kira_acquire::error::AcquireError;
use kira_acquire::merge::MergeMethod;
use kira_acquire::pipeline::Pipeline;
use kira_acquire::recipe::{RecipeBuilder, StepSpec};

fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

#[test]
fn recipe_steps_deserialize() {
    let config = parse(
        r#"{
            "working_directory": "/data/cache",
            "fetch": { "tool": "curl", "timeout_secs": 5 },
            "pipelines": [
                { "name": "clinvar", "steps": [
                    { "step": "fetch", "url": "https://example.org/clinvar.vcf.gz" },
                    { "step": "gunzip" },
                    { "step": "sort", "keys": ["-k1,1", "-k2,2n"] },
                    { "step": "bgzip" },
                    { "step": "index", "preset": "vcf" },
                    { "step": "finalize", "path": "/data/clinvar.vcf.gz.tbi", "mode": "link" }
                ] }
            ]
        }"#,
    );
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.settings.working_directory, "/data/cache");
    assert_eq!(resolved.settings.fetch.tool, FetchTool::Curl);
    assert_eq!(resolved.settings.fetch.timeout_secs, 5);

    let steps = &resolved.pipelines[0].steps;
    assert_eq!(steps.len(), 6);
    assert_matches!(&steps[2], StepSpec::Sort { keys } if keys.len() == 2);
    assert_matches!(&steps[5], StepSpec::Finalize { mode: Some(mode), .. } if mode == "link");
}

#[test]
fn recipe_and_builder_resolve_the_same_path() {
    let (_temp, root) = workspace();
    let config = parse(&format!(
        r#"{{
            "working_directory": "{work}",
            "pipelines": [
                {{ "name": "genes", "steps": [
                    {{ "step": "fetch", "url": "https://example.org/genes.gff.gz" }},
                    {{ "step": "gunzip" }}
                ] }}
            ]
        }}"#,
        work = root.join("work")
    ));
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let base = Pipeline::new(&resolved.settings).unwrap();
    let built = RecipeBuilder::new(base.clone())
        .build(&resolved.pipelines)
        .unwrap();

    let by_hand = base
        .fetch("https://example.org/genes.gff.gz")
        .unwrap()
        .gunzip()
        .unwrap();
    assert_eq!(built[0].name, "genes");
    assert_eq!(built[0].pipeline.path().unwrap(), by_hand.path().unwrap());
}

#[test]
fn merge_recipe_runs_end_to_end() {
    let (_temp, root) = workspace();
    fs::write(root.join("part1.txt"), "one\n").unwrap();
    fs::write(root.join("part2.txt"), "two\n").unwrap();
    let destination = root.join("out/all.txt");

    let config = parse(&format!(
        r#"{{
            "working_directory": "{work}",
            "pipelines": [
                {{ "name": "p1", "steps": [ {{ "step": "local", "path": "{p1}" }} ] }},
                {{ "name": "p2", "steps": [ {{ "step": "local", "path": "{p2}" }} ] }},
                {{ "name": "all", "steps": [
                    {{ "step": "merge", "sources": ["p1", "p2"], "method": "cat" }},
                    {{ "step": "finalize", "path": "{dest}" }}
                ] }}
            ]
        }}"#,
        work = root.join("work"),
        p1 = root.join("part1.txt"),
        p2 = root.join("part2.txt"),
        dest = destination,
    ));
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let built = RecipeBuilder::new(Pipeline::new(&resolved.settings).unwrap())
        .build(&resolved.pipelines)
        .unwrap();

    let all = &built[2].pipeline;
    assert_eq!(all.path().unwrap(), destination);
    all.run().unwrap();
    assert_eq!(fs::read_to_string(&destination).unwrap(), "one\ntwo\n");
    assert!(all.exists().unwrap());
}

#[test]
fn merge_sources_must_be_declared_first() {
    let config = parse(
        r#"{ "pipelines": [
            { "name": "all", "steps": [ { "step": "merge", "sources": ["later"] } ] },
            { "name": "later", "steps": [ { "step": "local", "path": "/tmp/x" } ] }
        ] }"#,
    );
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let base = Pipeline::new(&resolved.settings).unwrap();
    assert_matches!(
        RecipeBuilder::new(base).build(&resolved.pipelines),
        Err(AcquireError::InvalidConfiguration(_))
    );
}

#[test]
fn unknown_methods_are_rejected() {
    let config = parse(
        r#"{ "pipelines": [
            { "name": "a", "steps": [ { "step": "local", "path": "/tmp/a" } ] },
            { "name": "b", "steps": [ { "step": "merge", "sources": ["a"], "method": "interleave" } ] }
        ] }"#,
    );
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let base = Pipeline::new(&resolved.settings).unwrap();
    assert_matches!(
        RecipeBuilder::new(base).build(&resolved.pipelines),
        Err(AcquireError::UnsupportedMethod(_))
    );
    assert_eq!(MergeMethod::default(), MergeMethod::Concatenate);
}

#[test]
fn recipe_without_steps_is_rejected() {
    let config = parse(r#"{ "pipelines": [ { "name": "empty", "steps": [] } ] }"#);
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let base = Pipeline::new(&resolved.settings).unwrap();
    assert_matches!(
        RecipeBuilder::new(base).build(&resolved.pipelines),
        Err(AcquireError::InvalidConfiguration(_))
    );
}

#[test]
fn unsupported_fetch_scheme_is_rejected() {
    let config = parse(
        r#"{ "pipelines": [
            { "name": "a", "steps": [ { "step": "fetch", "url": "gopher://example.org/x" } ] }
        ] }"#,
    );
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let base = Pipeline::new(&resolved.settings).unwrap();
    assert_matches!(
        RecipeBuilder::new(base).build(&resolved.pipelines),
        Err(AcquireError::UnsupportedMethod(_))
    );
}

#[test]
fn config_file_is_read_from_disk() {
    let (_temp, root) = workspace();
    let path = root.join("kira-acquire.json");
    fs::write(
        &path,
        r#"{ "redo": true, "pipelines": [ { "name": "a", "steps": [ { "step": "gunzip" } ] } ] }"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert!(resolved.settings.redo);
    assert_eq!(resolved.pipelines.len(), 1);

    fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(AcquireError::ConfigParse(_))
    );
    assert_matches!(
        ConfigLoader::resolve(Some(root.join("missing.json").as_str())),
        Err(AcquireError::ConfigRead(_))
    );
}
