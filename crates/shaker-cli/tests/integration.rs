use shaker_cli::input::Input;
use shaker_cli::runner::Runner;

#[test]
fn integration() -> anyhow::Result<()> {
    let mut settings = Input::load("tests/parameters.json")?.build()?;
    assert_eq!(settings.project, "tests/project.json");
    assert_eq!(settings.parameters.peptide_fdr, 30.0);
    assert_eq!(settings.parameters.mapping.threads, 2);

    settings.output_directory = std::env::temp_dir().join("shaker-integration");
    std::fs::create_dir_all(&settings.output_directory)?;

    let settings = Runner::new(settings)?.run()?;
    assert_eq!(settings.output_paths.len(), 4);
    for path in &settings.output_paths {
        assert!(std::path::Path::new(path).exists(), "{}", path);
    }

    let psms = std::fs::read_to_string(&settings.output_paths[0])?;
    // header plus every spectrum with a best assumption
    assert_eq!(psms.lines().count(), 31);
    let header = psms.lines().next().unwrap_or_default();
    assert!(header.starts_with("spectrum\tfraction\tpeptide"));

    let proteins = std::fs::read_to_string(&settings.output_paths[2])?;
    assert!(proteins.contains("Peptide-rich protein"));

    let results: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&settings.output_paths[3])?)?;
    assert_eq!(results["project"], "tests/project.json");
    assert_eq!(results["metrics"]["validated_psms"]["run1"], 12);
    assert_eq!(results["metrics"]["validated_psms"]["run2"], 12);
    assert!(results["maps"]["psm"].is_array());

    Ok(())
}
