use assert_cmd::cargo::cargo_bin_cmd;
use pdf_engine::fixtures::blank_pdf;
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self { temp: tempfile::tempdir().expect("temp dir should be created") }
    }

    fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp.path().join(name);
        std::fs::write(&path, bytes).expect("fixture should be written");
        path
    }

    fn plan(&self) -> PathBuf {
        self.write("plan.pdf", &blank_pdf(&[(612, 792), (842, 595)]))
    }

    fn script(&self, name: &str, events: Value) -> PathBuf {
        self.write(name, events.to_string().as_bytes())
    }

    fn run_json(&self, args: &[&str], file: Option<&Path>) -> Value {
        let mut cmd = cargo_bin_cmd!("takeoff-cli");
        cmd.arg("--data-dir").arg(self.data_dir()).args(args);
        if let Some(file) = file {
            cmd.arg(file);
        }
        let output = cmd.assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).expect("stdout should contain valid json")
    }

    fn replay(&self, plan: &Path, script: &Path, extra: &[&str]) -> Value {
        let mut cmd = cargo_bin_cmd!("takeoff-cli");
        let output = cmd
            .arg("--data-dir")
            .arg(self.data_dir())
            .args(extra)
            .arg("replay")
            .arg(plan)
            .arg("--script")
            .arg(script)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("stdout should contain valid json")
    }
}

fn measure_slab_script() -> Value {
    serde_json::json!([
        { "event": "startCalibration", "unit": "m" },
        { "event": "referencePoint", "x": 0.0, "y": 0.0 },
        { "event": "referencePoint", "x": 100.0, "y": 0.0 },
        { "event": "realDistance", "value": 5.0 },
        { "event": "completeCalibration" },
        { "event": "beginDraft", "kind": "polygon" },
        { "event": "point", "x": 100.0, "y": 100.0 },
        { "event": "point", "x": 200.0, "y": 100.0 },
        { "event": "point", "x": 200.0, "y": 200.0 },
        { "event": "point", "x": 100.0, "y": 200.0 },
        { "event": "completeDraft" },
        { "event": "rename", "index": 0, "name": "Slab" },
        { "event": "renamePage", "page": 1, "name": "Ground floor" },
        { "event": "beginDraft", "kind": "polyline" },
        { "event": "completeDraft" }
    ])
}

#[test]
fn info_emits_stable_json_contract() {
    let fixture = Fixture::new();
    let plan = fixture.plan();

    let mut value = fixture.run_json(&["info"], Some(&plan));

    let key = value["session_key"].as_str().expect("session key should be a string");
    assert!(key.starts_with("plan.pdf-"));
    assert_eq!(value["first_page_size_pt"]["width"].as_f64(), Some(612.0));
    assert_eq!(value["first_page_size_pt"]["height"].as_f64(), Some(792.0));

    value["path"] = Value::String("<FIXTURE>".to_owned());
    value["session_key"] = Value::String("<KEY>".to_owned());
    value.as_object_mut().expect("info should be an object").remove("first_page_size_pt");

    insta::with_settings!({ sort_maps => true }, {
        insta::assert_json_snapshot!("cli_info_blank_pdf", value);
    });
}

#[test]
fn replay_measures_and_saves_session() {
    let fixture = Fixture::new();
    let plan = fixture.plan();
    let script = fixture.script("script.json", measure_slab_script());

    let value = fixture.replay(&plan, &script, &[]);

    let measurement = &value["session"]["measurements"][0];
    assert_eq!(measurement["name"], "Slab");
    assert_eq!(measurement["kind"], "polygon");
    assert_eq!(measurement["value"].as_f64(), Some(25.0));
    assert_eq!(measurement["unit"], "m");
    assert_eq!(measurement["color"], "#22c55e");
    assert_eq!(value["session"]["calibrations"]["0"]["scaleFactor"].as_f64(), Some(0.05));
    assert_eq!(value["session"]["pageNames"]["0"], "Ground floor");

    assert_eq!(value["gated"][0]["step"], 13);
    assert_eq!(value["gated"][0]["decision"]["reason"], "length");
    assert_eq!(value["errors"].as_array().map(Vec::len), Some(1));
    assert_eq!(value["errors"][0]["step"], 14);

    assert_eq!(value["save"]["status"], "saved");
    assert_eq!(value["save"]["savedCount"], 1);
}

#[test]
fn second_save_is_gated_until_entitled() {
    let fixture = Fixture::new();
    let plan = fixture.plan();
    let first = fixture.script("first.json", measure_slab_script());
    let rename = fixture.script(
        "rename.json",
        serde_json::json!([{ "event": "rename", "index": 0, "name": "Deck" }]),
    );

    fixture.replay(&plan, &first, &[]);

    let gated = fixture.replay(&plan, &rename, &[]);
    assert_eq!(gated["save"]["status"], "gated");
    assert_eq!(gated["save"]["decision"]["reason"], "storage");
    assert_eq!(gated["session"]["measurements"][0]["name"], "Deck");

    let usage = fixture.run_json(&["usage"], None);
    assert_eq!(usage["savedCount"], 1);
    assert_eq!(usage["remainingSaves"], 0);

    let entitled = fixture.replay(&plan, &rename, &["--entitled"]);
    assert_eq!(entitled["save"]["status"], "saved");
    assert_eq!(entitled["save"]["savedCount"], 2);

    let reset = fixture.run_json(&["usage", "--reset"], None);
    assert_eq!(reset["savedCount"], 0);
    assert_eq!(reset["remainingSaves"], 1);
}

#[test]
fn replay_restores_stored_session() {
    let fixture = Fixture::new();
    let plan = fixture.plan();
    let first = fixture.script("first.json", measure_slab_script());
    let empty = fixture.script("empty.json", serde_json::json!([]));

    fixture.replay(&plan, &first, &[]);
    let value = fixture.replay(&plan, &empty, &[]);

    assert_eq!(value["session"]["measurements"][0]["name"], "Slab");
    assert!(value["save"].is_null());
}

#[test]
fn export_csv_lists_measurements() {
    let fixture = Fixture::new();
    let plan = fixture.plan();
    let script = fixture.script("script.json", measure_slab_script());
    fixture.replay(&plan, &script, &[]);

    cargo_bin_cmd!("takeoff-cli")
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("export-csv")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ID,Page,Page Name,Kind,Name,Value,Unit,Color,Points,Created"))
        .stdout(predicate::str::contains(",0,Ground floor,polygon,Slab,25.00,m²,#22c55e,"));

    let output_path = fixture.temp.path().join("out.csv");
    cargo_bin_cmd!("takeoff-cli")
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("export-csv")
        .arg(&plan)
        .arg("--page")
        .arg("2")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 rows written"));

    let csv = std::fs::read_to_string(&output_path).expect("csv should be written");
    assert_eq!(csv.lines().count(), 1);
}

#[test]
fn render_prints_draw_list_and_writes_png() {
    let fixture = Fixture::new();
    let plan = fixture.plan();
    let script = fixture.script("script.json", measure_slab_script());
    fixture.replay(&plan, &script, &[]);
    let output_path = fixture.temp.path().join("page.png");

    let value = fixture.run_json(
        &["render", "--output", output_path.to_str().expect("utf-8 temp path")],
        Some(&plan),
    );

    let ops: Vec<&str> = value
        .as_array()
        .expect("draw list should be an array")
        .iter()
        .filter_map(|instruction| instruction["op"].as_str())
        .collect();
    assert_eq!(ops, ["clear", "raster", "polygon", "text", "text"]);
    assert_eq!(value[0]["width"], 1224);
    assert_eq!(value[4]["text"], "25.00 m²");

    let image = image::open(&output_path).expect("page raster should be readable image");
    assert_eq!((image.width(), image.height()), (1224, 1584));
}

#[test]
fn render_second_page_is_empty_and_landscape() {
    let fixture = Fixture::new();
    let plan = fixture.plan();

    let value = fixture.run_json(&["render", "--page", "2"], Some(&plan));

    assert_eq!(value.as_array().map(Vec::len), Some(2));
    assert_eq!(value[0]["width"], 1684);
    assert_eq!(value[0]["height"], 1190);
}

#[test]
fn history_records_entitled_documents() {
    let fixture = Fixture::new();
    let plan = fixture.plan();

    let empty = fixture.script("empty.json", serde_json::json!([]));

    fixture.replay(&plan, &empty, &[]);
    let history = fixture.run_json(&["history"], None);
    assert_eq!(history.as_array().map(Vec::len), Some(0));

    fixture.replay(&plan, &empty, &["--entitled"]);
    let history = fixture.run_json(&["history"], None);
    assert_eq!(history[0]["name"], "plan.pdf");
    assert_eq!(history[0]["measurementCount"], 0);
    let last_accessed = history[0]["lastAccessed"].clone();

    fixture.run_json(&["--entitled", "render"], Some(&plan));
    cargo_bin_cmd!("takeoff-cli")
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("--entitled")
        .arg("export-csv")
        .arg(&plan)
        .arg("--output")
        .arg(fixture.temp.path().join("out.csv"))
        .assert()
        .success();
    let history = fixture.run_json(&["history"], None);
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["lastAccessed"], last_accessed);
}

#[test]
fn oversized_document_is_refused() {
    let fixture = Fixture::new();
    let big = fixture.write("big.pdf", &vec![b' '; 5 * 1024 * 1024 + 1]);
    let script = fixture.script("script.json", serde_json::json!([]));

    cargo_bin_cmd!("takeoff-cli")
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("replay")
        .arg(&big)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("rerun with --entitled"));
}

#[test]
fn oversized_page_box_fails_cleanly() {
    let fixture = Fixture::new();
    let huge = fixture.write("huge.pdf", &blank_pdf(&[(100_000, 100_000)]));

    cargo_bin_cmd!("takeoff-cli")
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("render")
        .arg(&huge)
        .assert()
        .failure()
        .stderr(predicate::str::contains("too large to rasterize"));
}

#[test]
fn info_fails_for_missing_file() {
    let fixture = Fixture::new();

    cargo_bin_cmd!("takeoff-cli")
        .arg("info")
        .arg(fixture.temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let fixture = Fixture::new();
    let invalid = fixture.write("invalid.pdf", b"not a pdf at all");

    cargo_bin_cmd!("takeoff-cli")
        .arg("info")
        .arg(invalid)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let fixture = Fixture::new();
    let encrypted = fixture.write("encrypted.pdf", b"%PDF-1.5\n<< /Encrypt 5 0 R >>\n%%EOF\n");

    cargo_bin_cmd!("takeoff-cli")
        .arg("info")
        .arg(encrypted)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}

#[test]
fn replay_reports_malformed_script() {
    let fixture = Fixture::new();
    let plan = fixture.plan();
    let script = fixture.write("bad.json", br#"[{ "event": "teleport" }]"#);

    cargo_bin_cmd!("takeoff-cli")
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("replay")
        .arg(&plan)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse replay script"));
}
