//! Typecheck/lint/unit runner. A missing host command or frontend script is
//! reported `skipped = true, ok = true`, never a hard failure — the build
//! runtime does not assume any particular toolchain is installed.

use std::path::PathBuf;

use webforge_types::CheckReport;

pub struct CheckTools {
    project_path: PathBuf,
    frontend_path: PathBuf,
    backend_path: PathBuf,
}

struct RunOutcome {
    ok: bool,
    output: String,
    skipped: bool,
}

impl CheckTools {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        let project_path = project_path.into();
        Self {
            frontend_path: project_path.join("frontend"),
            backend_path: project_path.join("backend"),
            project_path,
        }
    }

    pub async fn typecheck(&self) -> RunOutcome {
        self.run_frontend_script("typecheck").await
    }

    pub async fn lint(&self) -> RunOutcome {
        self.run_frontend_script("lint").await
    }

    pub async fn unit(&self) -> RunOutcome {
        match tokio::process::Command::new("pytest")
            .arg("-q")
            .arg(&self.backend_path)
            .output()
            .await
        {
            Ok(output) => RunOutcome {
                ok: output.status.success(),
                output: format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
                skipped: false,
            },
            Err(_) => RunOutcome {
                ok: true,
                output: "skipped".to_string(),
                skipped: true,
            },
        }
    }

    pub async fn all(&self) -> CheckReport {
        let t = self.typecheck().await;
        let l = self.lint().await;
        let u = self.unit().await;
        CheckReport {
            ok: t.ok && l.ok && u.ok,
            typecheck_ok: t.ok,
            lint_ok: l.ok,
            unit_ok: u.ok,
            logs: format!("TC: {}\nLint: {}\nUnit: {}", t.output, l.output, u.output),
        }
    }

    async fn load_frontend_scripts(&self) -> serde_json::Map<String, serde_json::Value> {
        let pkg_path = self.frontend_path.join("package.json");
        let Ok(text) = tokio::fs::read_to_string(&pkg_path).await else {
            return serde_json::Map::new();
        };
        let Ok(data) = serde_json::from_str::<serde_json::Value>(&text) else {
            return serde_json::Map::new();
        };
        data.get("scripts")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default()
    }

    async fn run_frontend_script(&self, name: &str) -> RunOutcome {
        let scripts = self.load_frontend_scripts().await;
        if !scripts.contains_key(name) {
            return RunOutcome {
                ok: true,
                output: "skipped".to_string(),
                skipped: true,
            };
        }
        match tokio::process::Command::new("pnpm")
            .arg("-C")
            .arg(&self.frontend_path)
            .arg(name)
            .output()
            .await
        {
            Ok(output) => RunOutcome {
                ok: output.status.success(),
                output: format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
                skipped: false,
            },
            Err(_) => RunOutcome {
                ok: true,
                output: "skipped".to_string(),
                skipped: true,
            },
        }
    }

    pub fn project_path(&self) -> &PathBuf {
        &self.project_path
    }
}
