use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use geoflat::assemble::{AssemblyManifest, PROBES_DROPPED_COLUMNS, assemble, is_assembled};
use geoflat::domain::Accession;
use geoflat::error::GeoflatError;
use geoflat::layout::{Layout, TableKind};
use rayon::ThreadPoolBuilder;

fn line(cells: &[&str]) -> String {
    format!("{}\n", cells.join("\t"))
}

fn probes_header() -> Vec<&'static str> {
    let mut header = vec!["Species", "Probe_Id", "Symbol"];
    header.extend(PROBES_DROPPED_COLUMNS);
    header
}

fn annotation_file(probe: &str, symbol: &str) -> String {
    let mut text = String::from("Illumina annotation export\n");
    text.push_str("[Heading]\n");
    text.push_str(&line(&["Date", "10/16/2009"]));
    text.push_str(&line(&["ContentVersion", "HumanHT-12 v3"]));
    text.push_str("[Probes]\n");
    text.push_str(&line(&probes_header()));
    let mut row = vec!["Homo sapiens", probe, symbol];
    row.extend(["def", "comp", "proc", "obs", "ACGT", "syn", "func"]);
    text.push_str(&line(&row));
    text.push_str("[Control Probes]\n");
    text.push_str(&line(&["Probe_Id", "Reporter_Group_Name"]));
    text.push_str(&line(&[format!("{probe}_ctl").as_str(), "housekeeping"]));
    text
}

fn setup() -> (tempfile::TempDir, Layout) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let layout = Layout::new(root);
    layout.ensure_dirs().unwrap();
    (temp, layout)
}

fn write_raw(layout: &Layout, name: &str, content: &str) -> Utf8PathBuf {
    let path = layout.base_dir().join(name);
    fs::write(path.as_std_path(), content).unwrap();
    path
}

fn read(path: &Utf8PathBuf) -> String {
    fs::read_to_string(path.as_std_path()).unwrap()
}

fn accession() -> Accession {
    "GSE68849".parse().unwrap()
}

#[test]
fn assembles_merges_and_cleans_up() {
    let (_temp, layout) = setup();
    let first = write_raw(&layout, "a_annotation.txt", &annotation_file("ILMN_1", "GAPDH"));
    let second = write_raw(&layout, "b_annotation.txt", &annotation_file("ILMN_2", "ACTB"));
    let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();

    let manifest = assemble(&layout, &accession(), &pool).unwrap();

    assert_eq!(
        manifest.sections,
        vec!["Heading", "Probes", "Control Probes"]
    );
    let heading = read(&layout.tsv_path("Heading", TableKind::Full));
    assert_eq!(heading.lines().next(), Some("0\t1"));
    assert_eq!(heading.lines().count(), 5);

    let probes = read(&layout.tsv_path("Probes", TableKind::Full));
    let rows: Vec<&str> = probes.lines().skip(1).collect();
    assert!(rows[0].contains("ILMN_1"));
    assert!(rows[1].contains("ILMN_2"));

    let partial = read(&layout.tsv_path("Probes", TableKind::Partial));
    assert_eq!(
        partial,
        "Species\tProbe_Id\tSymbol\nHomo sapiens\tILMN_1\tGAPDH\nHomo sapiens\tILMN_2\tACTB\n"
    );

    let controls = layout.tsv_dir().join("Control_Probes_FULL.tsv");
    assert_eq!(read(&controls).lines().count(), 3);

    assert!(!first.as_std_path().exists());
    assert!(!second.as_std_path().exists());
    assert!(is_assembled(&layout));

    let stored = AssemblyManifest::read(&layout.assembly_manifest_path()).unwrap();
    assert_eq!(stored, manifest);
    let partial_entry = stored
        .outputs
        .iter()
        .find(|output| output.kind == "PARTIAL")
        .unwrap();
    assert_eq!(partial_entry.file, "Probes_PARTIAL.tsv");
    assert_eq!(partial_entry.rows, 2);
}

#[test]
fn missing_probes_writes_nothing_and_keeps_inputs() {
    let (_temp, layout) = setup();
    let raw = write_raw(
        &layout,
        "controls_only.txt",
        &format!("[Controls]\n{}{}", line(&["Probe_Id"]), line(&["1"])),
    );
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();

    let err = assemble(&layout, &accession(), &pool).unwrap_err();
    assert_matches!(err, GeoflatError::MissingSection(ref name) if name == "Probes");
    assert!(raw.as_std_path().exists());
    assert!(!layout.has_tsv_outputs());
    assert!(!is_assembled(&layout));
}

#[test]
fn failed_persistence_keeps_raw_inputs() {
    let (_temp, layout) = setup();
    let raw = write_raw(&layout, "a.txt", &annotation_file("ILMN_1", "GAPDH"));
    fs::remove_dir(layout.tsv_dir().as_std_path()).unwrap();
    fs::write(layout.tsv_dir().as_std_path(), b"not a directory").unwrap();
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();

    let err = assemble(&layout, &accession(), &pool).unwrap_err();
    assert_matches!(err, GeoflatError::Filesystem(_));
    assert!(raw.as_std_path().exists());
}

#[test]
fn malformed_section_is_a_parse_error() {
    let (_temp, layout) = setup();
    let raw = write_raw(
        &layout,
        "wide.txt",
        &format!("[Probes]\n{}{}", line(&["Probe_Id"]), line(&["ILMN_1", "extra"])),
    );
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();

    let err = assemble(&layout, &accession(), &pool).unwrap_err();
    assert_matches!(
        err,
        GeoflatError::Parse { ref section, ref file, .. }
            if section == "Probes" && file.ends_with("wide.txt")
    );
    assert!(raw.as_std_path().exists());
}

#[test]
fn completion_requires_every_listed_output() {
    let (_temp, layout) = setup();
    write_raw(&layout, "a.txt", &annotation_file("ILMN_1", "GAPDH"));
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    assemble(&layout, &accession(), &pool).unwrap();
    assert!(is_assembled(&layout));

    fs::remove_file(layout.tsv_path("Heading", TableKind::Full).as_std_path()).unwrap();
    assert!(!is_assembled(&layout));
    assert!(layout.has_tsv_outputs());
}

#[test]
fn section_names_with_separators_stay_in_table_dir() {
    let (_temp, layout) = setup();
    let mut text = annotation_file("ILMN_1", "GAPDH");
    text.push_str("[../escape]\n");
    text.push_str(&line(&["k"]));
    text.push_str(&line(&["v"]));
    write_raw(&layout, "a.txt", &text);
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();

    let manifest = assemble(&layout, &accession(), &pool).unwrap();

    let entry = manifest
        .outputs
        .iter()
        .find(|output| output.section == "../escape")
        .unwrap();
    assert_eq!(entry.file, ".._escape_FULL.tsv");
    assert!(layout.tsv_dir().join(&entry.file).as_std_path().is_file());
    assert!(!layout.base_dir().join("escape_FULL.tsv").as_std_path().exists());
    assert!(is_assembled(&layout));
}
