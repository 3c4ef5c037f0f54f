//! End-to-end tests for the parse, prepare, delete and apply phases.

use conductor::config::Settings;
use conductor::error::ConductorError;
use conductor::plugins::{Plugin, PluginFactory};
use conductor::runner::LifecycleRunner;
use conductor::template::{Template, TemplateLoader};
use httpmock::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn loader(work_dir: &Path) -> TemplateLoader {
    TemplateLoader::new(Settings::new(work_dir))
        .with_env(HashMap::from([("TOKEN".to_string(), "abc".to_string())]))
}

fn template(work_dir: &Path, descriptor: &str) -> Template {
    loader(work_dir).parse_str(descriptor).unwrap()
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn renders_inline_content_with_variables() {
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path().join("install");
    let template = template(
        &work_dir,
        r#"{
            "_conductor": {"version": 1, "name": "render", "variables": {"name": "world"}},
            "filesystem": {
                "greeting.txt": {"type": "file", "content": "hello {{name}}"}
            }
        }"#,
    );

    LifecycleRunner::new(&template).run().unwrap();

    assert_eq!(
        fs::read_to_string(work_dir.join("greeting.txt")).unwrap(),
        "hello world"
    );
}

#[test]
fn renders_line_arrays_and_newline_token() {
    let temp = TempDir::new().unwrap();
    let template = template(
        temp.path(),
        r#"{
            "_conductor": {"version": 1, "name": "render"},
            "filesystem": {
                "conf": {"type": "folder", "content": {
                    "a.properties": {"type": "file", "content": ["x=1", "y=2"]},
                    "b.properties": {"type": "file", "content": "x=1{NEWLINE}y=2"}
                }}
            }
        }"#,
    );

    LifecycleRunner::new(&template).run().unwrap();

    let expected = format!("x=1{}y=2", conductor::template::line_separator());
    assert_eq!(
        fs::read_to_string(temp.path().join("conf/a.properties")).unwrap(),
        expected
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("conf/b.properties")).unwrap(),
        expected
    );
}

#[test]
fn retrieves_and_unpacks_archive_into_folder() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/dist/lib-1.0.zip");
        then.status(200)
            .body(zip_bytes(&[("a.txt", "alpha"), ("nested/b.txt", "beta")]));
    });
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path().join("install");
    let descriptor = format!(
        r#"{{
            "_conductor": {{"version": 1, "name": "unzip", "variables": {{"version": "1.0"}}}},
            "filesystem": {{
                "lib": {{"type": "folder", "retrieval": {{
                    "retrieve": true,
                    "method": "url",
                    "unzipRequired": true,
                    "url": "{}"
                }}}}
            }}
        }}"#,
        server.url("/dist/lib-{{version}}.zip")
    );
    let template = template(&work_dir, &descriptor);

    LifecycleRunner::new(&template).run().unwrap();

    assert_eq!(fs::read_to_string(work_dir.join("lib/a.txt")).unwrap(), "alpha");
    assert_eq!(
        fs::read_to_string(work_dir.join("lib/nested/b.txt")).unwrap(),
        "beta"
    );
    assert!(!template.staging_dir().exists());
    let leftovers: Vec<_> = fs::read_dir(&work_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["lib".to_string()]);
}

#[test]
fn retrieves_single_file_without_unpacking() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/tools/agent.jar");
        then.status(200).body("jar-bytes");
    });
    let temp = TempDir::new().unwrap();
    let descriptor = format!(
        r#"{{
            "_conductor": {{"version": 1, "name": "plain"}},
            "filesystem": {{
                "tools": {{"type": "folder", "retrieval": {{"retrieve": true, "url": "{}"}}}}
            }}
        }}"#,
        server.url("/tools/agent.jar")
    );
    let template = template(temp.path(), &descriptor);

    LifecycleRunner::new(&template).run().unwrap();

    assert_eq!(
        fs::read_to_string(temp.path().join("tools/agent.jar")).unwrap(),
        "jar-bytes"
    );
}

#[test]
fn http_plugin_uses_shared_secret() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/app.jar").header("X-Token", "abc");
        then.status(200).body("app");
    });
    let temp = TempDir::new().unwrap();
    let descriptor = format!(
        r#"{{
            "_conductor": {{
                "version": 1,
                "name": "plugin",
                "secrets": {{"repo": {{"type": "http", "headers": {{"X-Token": "{{{{$TOKEN$}}}}"}}}}}}
            }},
            "filesystem": {{
                "app.jar": {{"type": "file", "plugins": "http", "http": {{"url": "{}", "secret": "repo"}}}}
            }}
        }}"#,
        server.url("/app.jar")
    );
    let template = template(temp.path(), &descriptor);

    LifecycleRunner::new(&template).run().unwrap();

    mock.assert();
    assert_eq!(fs::read_to_string(temp.path().join("app.jar")).unwrap(), "app");
}

#[test]
fn jenkins_retrieval_unpacks_matching_artifact() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/job/server-build/api/json");
        then.status(200).json_body(serde_json::json!({"name": "server-build"}));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/job/server-build/lastSuccessfulBuild/api/json");
        then.status(200).json_body(serde_json::json!({
            "number": 12,
            "artifacts": [
                {"fileName": "notes.txt", "relativePath": "out/notes.txt"},
                {"fileName": "Server.ZIP", "relativePath": "out/Server.ZIP"}
            ]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/job/server-build/12/artifact/out/Server.ZIP");
        then.status(200).body(zip_bytes(&[("server.properties", "port=25565")]));
    });
    let temp = TempDir::new().unwrap();
    let descriptor = format!(
        r#"{{
            "_conductor": {{"version": 1, "name": "ci"}},
            "filesystem": {{
                "server": {{"type": "folder", "retrieval": {{
                    "retrieve": true,
                    "method": "jenkins",
                    "server": "{}",
                    "job": "server-build",
                    "artifact": "server.zip",
                    "unzipRequired": true
                }}}}
            }}
        }}"#,
        server.base_url()
    );
    let template = template(temp.path(), &descriptor);

    LifecycleRunner::new(&template).run().unwrap();

    assert_eq!(
        fs::read_to_string(temp.path().join("server/server.properties")).unwrap(),
        "port=25565"
    );
}

#[test]
fn jenkins_missing_artifact_is_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/job/server-build/api/json");
        then.status(200).json_body(serde_json::json!({}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/job/server-build/7/api/json");
        then.status(200)
            .json_body(serde_json::json!({"number": 7, "artifacts": []}));
    });
    let temp = TempDir::new().unwrap();
    let descriptor = format!(
        r#"{{
            "_conductor": {{"version": 1, "name": "ci"}},
            "filesystem": {{
                "server.zip": {{"type": "file", "plugins": "jenkins", "jenkins": {{
                    "server": "{}", "job": "server-build", "build": 7, "artifact": "server.zip"
                }}}}
            }}
        }}"#,
        server.base_url()
    );
    let template = template(temp.path(), &descriptor);

    let err = LifecycleRunner::new(&template).run().unwrap_err();

    assert!(matches!(err, ConductorError::ArtifactNotFound { .. }));
    assert!(!temp.path().join("server.zip").exists());
}

#[test]
fn missing_content_fails_before_any_write() {
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path().join("install");
    let template = template(
        &work_dir,
        r#"{
            "_conductor": {"version": 1, "name": "broken"},
            "filesystem": {
                "ok.txt": {"type": "file", "content": "fine"},
                "conf": {"type": "folder", "content": {
                    "app.properties": {"type": "file"}
                }}
            }
        }"#,
    );

    let err = LifecycleRunner::new(&template).run().unwrap_err();

    assert!(matches!(err, ConductorError::Configuration { .. }));
    assert!(!work_dir.exists());
}

#[test]
fn unknown_plugin_fails_before_any_write() {
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path().join("install");
    let template = template(
        &work_dir,
        r#"{
            "_conductor": {"version": 1, "name": "broken"},
            "filesystem": {"a.bin": {"type": "file", "plugins": "ftp"}}
        }"#,
    );

    let err = LifecycleRunner::new(&template).run().unwrap_err();

    assert!(matches!(err, ConductorError::UnknownPluginType { name } if name == "ftp"));
    assert!(!work_dir.exists());
}

#[test]
fn failed_prepare_leaves_existing_tree_untouched() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing.zip");
        then.status(404);
    });
    let temp = TempDir::new().unwrap();
    let work_dir = temp.path().join("install");
    fs::create_dir_all(work_dir.join("conf")).unwrap();
    fs::write(work_dir.join("conf/app.properties"), "port=1").unwrap();
    fs::create_dir_all(work_dir.join("lib")).unwrap();
    fs::write(work_dir.join("lib/old.jar"), "old").unwrap();

    let descriptor = format!(
        r#"{{
            "_conductor": {{"version": 1, "name": "partial"}},
            "filesystem": {{
                "conf": {{"type": "folder", "content": {{
                    "app.properties": {{"type": "file", "content": "port=2"}}
                }}}},
                "lib": {{"type": "folder", "retrieval": {{
                    "retrieve": true, "unzipRequired": true, "url": "{}"
                }}}}
            }}
        }}"#,
        server.url("/missing.zip")
    );
    let template = template(&work_dir, &descriptor);

    let err = LifecycleRunner::new(&template).run().unwrap_err();

    assert!(matches!(err, ConductorError::Retrieval { .. }));
    assert_eq!(
        fs::read_to_string(work_dir.join("conf/app.properties")).unwrap(),
        "port=1"
    );
    assert_eq!(fs::read_to_string(work_dir.join("lib/old.jar")).unwrap(), "old");
    assert!(!template.staging_dir().exists());
}

type Events = Arc<Mutex<Vec<String>>>;

struct RecorderFactory {
    events: Events,
}

struct Recorder {
    label: String,
    events: Events,
}

impl PluginFactory for RecorderFactory {
    fn name(&self) -> &str {
        "recorder"
    }

    fn create(
        &self,
        declaration: &Value,
        _template: &Template,
    ) -> conductor::Result<Box<dyn Plugin>> {
        let label = declaration["recorder"]["label"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(Box::new(Recorder {
            label,
            events: Arc::clone(&self.events),
        }))
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn prepare(&self, target: &Path, _template: &Template) -> conductor::Result<()> {
        let staged_children = if target.is_dir() {
            fs::read_dir(target).map(|entries| entries.count()).unwrap_or(0)
        } else {
            0
        };
        self.events.lock().unwrap().push(format!(
            "prepare {} staged={}",
            self.label, staged_children
        ));
        Ok(())
    }

    fn execute(&self, destination: &Path, _template: &Template) -> conductor::Result<()> {
        let parent_is_dir = destination.parent().is_some_and(Path::is_dir);
        self.events.lock().unwrap().push(format!(
            "execute {} exists={} parent={}",
            self.label,
            destination.exists(),
            parent_is_dir
        ));
        Ok(())
    }
}

#[test]
fn phases_run_in_tree_order() {
    let temp = TempDir::new().unwrap();
    let events: Events = Arc::default();
    let template = loader(temp.path())
        .with_factory(RecorderFactory {
            events: Arc::clone(&events),
        })
        .parse_str(
            r#"{
                "_conductor": {"version": 1, "name": "order"},
                "filesystem": {
                    "conf": {
                        "type": "folder",
                        "plugins": "recorder",
                        "recorder": {"label": "conf"},
                        "content": {
                            "a.txt": {
                                "type": "file",
                                "content": "a",
                                "plugins": ["recorder"],
                                "recorder": {"label": "a.txt"}
                            },
                            "b.txt": {"type": "file", "content": "b"}
                        }
                    }
                }
            }"#,
        )
        .unwrap();

    let summary = LifecycleRunner::new(&template).run().unwrap();

    assert_eq!(summary.plugins, 2);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "prepare a.txt staged=0",
            "prepare conf staged=2",
            "execute a.txt exists=true parent=true",
            "execute conf exists=true parent=true",
        ]
    );
}

const NESTED_TREE: &str = r#"{
    "_conductor": {"version": 1, "name": "nested"},
    "filesystem": {
        "conf": {"type": "folder", "content": {
            "a.txt": {"type": "file", "content": "a"},
            "sub": {"type": "folder", "content": {
                "x.txt": {"type": "file", "content": "x"}
            }}
        }},
        "top.txt": {"type": "file", "content": "top"}
    }
}"#;

#[test]
fn delete_removes_children_before_their_folder() {
    let temp = TempDir::new().unwrap();
    let template = template(temp.path(), NESTED_TREE);
    let runner = LifecycleRunner::new(&template);
    let mut nodes = template.build_filesystem_model().unwrap();
    runner.parse_all(&mut nodes).unwrap();

    let order: Vec<&Path> = nodes.iter().flat_map(|node| node.deletion_order()).collect();

    assert_eq!(
        order,
        vec![
            Path::new("conf/a.txt"),
            Path::new("conf/sub/x.txt"),
            Path::new("conf/sub"),
            Path::new("conf"),
            Path::new("top.txt"),
        ]
    );
}

#[test]
fn delete_clears_previous_installation() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("conf/sub")).unwrap();
    fs::write(temp.path().join("conf/a.txt"), "old").unwrap();
    fs::write(temp.path().join("conf/sub/stale.txt"), "stale").unwrap();
    fs::write(temp.path().join("top.txt"), "old").unwrap();
    fs::write(temp.path().join("unrelated.txt"), "keep").unwrap();
    let template = template(temp.path(), NESTED_TREE);
    let runner = LifecycleRunner::new(&template);
    let mut nodes = template.build_filesystem_model().unwrap();
    runner.parse_all(&mut nodes).unwrap();

    runner.delete_all(&nodes);

    assert!(!temp.path().join("conf").exists());
    assert!(!temp.path().join("top.txt").exists());
    assert_eq!(
        fs::read_to_string(temp.path().join("unrelated.txt")).unwrap(),
        "keep"
    );
}

#[test]
fn archive_download_leaves_similarly_named_sibling_alone() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/lib.zip");
        then.status(200).body(zip_bytes(&[("a.txt", "alpha")]));
    });
    let temp = TempDir::new().unwrap();
    let descriptor = format!(
        r#"{{
            "_conductor": {{"version": 1, "name": "siblings"}},
            "filesystem": {{
                "lib": {{"type": "folder", "retrieval": {{
                    "retrieve": true, "unzipRequired": true, "url": "{}"
                }}}},
                "lib.conductor-download": {{"type": "file", "content": "mine"}},
                "lib.zip": {{"type": "file", "content": "also mine"}}
            }}
        }}"#,
        server.url("/lib.zip")
    );
    let template = template(temp.path(), &descriptor);

    LifecycleRunner::new(&template).run().unwrap();

    assert_eq!(fs::read_to_string(temp.path().join("lib/a.txt")).unwrap(), "alpha");
    assert_eq!(
        fs::read_to_string(temp.path().join("lib.conductor-download")).unwrap(),
        "mine"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("lib.zip")).unwrap(),
        "also mine"
    );
    assert!(!template.download_dir().exists());
}
