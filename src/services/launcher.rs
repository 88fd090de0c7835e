//! Application launch pipeline.
//!
//! Turns a catalog entry (plus optional action, files and caller options)
//! into a transient systemd unit: resolve the Exec line, word-split it,
//! expand field codes, assemble an owned environment block, then submit
//! the unit. When no service manager is reachable a direct-spawn fallback
//! keeps launches working, marked unsupervised.

use crate::error::LaunchdError;
use crate::services::collaborators::{DisplayScale, ProxyConfig};
use crate::services::meminfo::MemoryGate;
use crate::services::settings::Settings;
use capy_apps::catalog::instance_object_path;
use capy_apps::field_codes::{self, ExpandContext};
use capy_apps::{AppCatalog, ApplicationRecord, Locale, paths};
use capy_systemd::manager::{ServiceManager, TransientUnit};
use capy_systemd::unit_name;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Environment variables stripped when the app proxy takes over.
const PROXY_VARIABLES: &[&str] = &[
    "auto_proxy",
    "AUTO_PROXY",
    "http_proxy",
    "HTTP_PROXY",
    "https_proxy",
    "HTTPS_PROXY",
    "ftp_proxy",
    "FTP_PROXY",
    "SOCKS_SERVER",
    "no_proxy",
    "NO_PROXY",
];

/// Recognized entries of the `options` argument to Launch.
#[derive(Clone, Debug, Default)]
pub struct LaunchOptions {
    /// Override the entry's `Path` (working directory).
    pub path: Option<String>,
    /// Replace the entry's `Exec` value before field-code expansion.
    pub override_exec: Option<String>,
    /// Extra `KEY=value` pairs appended last; they win over the base set.
    pub env: Vec<String>,
}

pub struct Launcher {
    catalog: Arc<AppCatalog>,
    settings: Arc<Settings>,
    manager: Option<Arc<dyn ServiceManager>>,
    proxy_config: Arc<dyn ProxyConfig>,
    display_scale: Arc<dyn DisplayScale>,
    memory_gate: Arc<dyn MemoryGate>,
}

impl Launcher {
    pub fn new(
        catalog: Arc<AppCatalog>,
        settings: Arc<Settings>,
        manager: Option<Arc<dyn ServiceManager>>,
        proxy_config: Arc<dyn ProxyConfig>,
        display_scale: Arc<dyn DisplayScale>,
        memory_gate: Arc<dyn MemoryGate>,
    ) -> Self {
        Self {
            catalog,
            settings,
            manager,
            proxy_config,
            display_scale,
            memory_gate,
        }
    }

    /// Launch an application and return the object path its instance will
    /// appear under. The instance record itself arrives asynchronously
    /// with the UnitNew signal, after the reply.
    pub async fn launch(
        &self,
        app_id: &str,
        action: &str,
        files: &[String],
        options: &LaunchOptions,
    ) -> Result<String, LaunchdError> {
        let record = self
            .catalog
            .get(app_id)
            .ok_or_else(|| LaunchdError::NotFound(format!("application {app_id}")))?;

        if !self
            .memory_gate
            .is_sufficient(self.settings.min_mem_available, self.settings.max_swap_used)
        {
            return Err(LaunchdError::LaunchRejected(
                "insufficient memory for a new launch".to_string(),
            ));
        }

        let argv = self.build_argv(&record, action, files, options)?;
        let environment = self.build_environment(&record, options).await;
        let working_directory = options
            .path
            .clone()
            .or_else(|| record.entry.working_path().map(str::to_string))
            .map(PathBuf::from)
            .unwrap_or_else(paths::home_dir);

        let instance_id = Uuid::new_v4().simple().to_string();
        let object_path = instance_object_path(&record.object_path, &instance_id);

        match &self.manager {
            Some(manager) => {
                let name = unit_name::encode_service(app_id, &instance_id);
                let unit = TransientUnit {
                    description: format!("Application {app_id} launched by capy-launchd"),
                    argv,
                    environment,
                    working_directory,
                };
                debug!("submitting transient unit {name}: {:?}", unit.argv);
                manager.start_transient_unit(&name, &unit).await?;
                info!("launched {app_id} as {name}");
            }
            None => {
                self.spawn_direct(&argv, &environment, &working_directory)?;
                // No unit signals will ever arrive; attach the instance now.
                let unit_path = format!(
                    "{}/unsupervised/{instance_id}",
                    capy_apps::catalog::BUS_PATH
                );
                self.catalog
                    .attach_instance(app_id, &instance_id, &unit_path, false);
                warn!("launched {app_id} unsupervised (no service manager)");
            }
        }

        Ok(object_path)
    }

    fn build_argv(
        &self,
        record: &ApplicationRecord,
        action: &str,
        files: &[String],
        options: &LaunchOptions,
    ) -> Result<Vec<String>, LaunchdError> {
        let locale = Locale::from_env();
        let entry = &record.entry;

        let (exec, name) = if action.is_empty() {
            (entry.exec(), entry.name(&locale))
        } else {
            let group = entry.action_group(action).ok_or_else(|| {
                LaunchdError::NotFound(format!("action {action} of {}", record.app_id))
            })?;
            (
                group.get("Exec"),
                group.localized("Name", &locale).or_else(|| entry.name(&locale)),
            )
        };

        let exec = options
            .override_exec
            .as_deref()
            .or(exec)
            .ok_or(LaunchdError::EmptyCommand)?;
        if exec.trim().is_empty() {
            return Err(LaunchdError::EmptyCommand);
        }

        let tokens = shlex::split(exec)
            .ok_or_else(|| LaunchdError::BadExec(format!("unbalanced quoting in {exec:?}")))?;
        let tokens = tokens.iter().map(|t| expand_word(t)).collect();

        let ctx = ExpandContext {
            icon: entry.icon(),
            name,
            source_path: record.source_path.to_str(),
        };
        let mut argv = field_codes::expand(tokens, files, &ctx);
        if argv.is_empty() {
            return Err(LaunchdError::EmptyCommand);
        }

        if entry.terminal() {
            argv.insert(0, self.settings.default_terminal_exec_arg.clone());
            argv.insert(0, self.settings.default_terminal.clone());
        }

        Ok(argv)
    }

    /// Assemble the child environment into owned storage. The parent
    /// environment is never mutated.
    async fn build_environment(
        &self,
        record: &ApplicationRecord,
        options: &LaunchOptions,
    ) -> Vec<String> {
        let mut env: Vec<(String, String)> = std::env::vars().collect();
        let app_id = record.app_id.as_str();

        if self.settings.use_proxy_apps.contains(app_id)
            && !self.proxy_config.proxy_message().await.is_empty()
        {
            env.retain(|(key, _)| !PROXY_VARIABLES.contains(&key.as_str()));
            debug!("stripped proxy variables for {app_id}");
        }

        if !self.settings.disable_scaling_apps.contains(app_id) {
            let scale = self.display_scale.scale_factor().await;
            let scale = if scale > 0.0 { scale } else { 1.0 };
            set_env(&mut env, "DEEPIN_WINE_SCALE", &scale.to_string());
        }

        set_env(
            &mut env,
            "GIO_LAUNCHED_DESKTOP_FILE",
            &record.source_path.to_string_lossy(),
        );

        for pair in &options.env {
            if let Some((key, value)) = pair.split_once('=') {
                set_env(&mut env, key, value);
            }
        }

        env.into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }

    /// Fallback for hosts without a reachable service manager. The child
    /// gets its own session and the launch-pid marker is written between
    /// fork and exec, which is the only point the pid is known.
    fn spawn_direct(
        &self,
        argv: &[String],
        environment: &[String],
        working_directory: &PathBuf,
    ) -> Result<(), LaunchdError> {
        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]).env_clear();
        if working_directory.is_dir() {
            cmd.current_dir(working_directory);
        }
        for pair in environment {
            if let Some((key, value)) = pair.split_once('=') {
                cmd.env(key, value);
            }
        }

        unsafe {
            cmd.pre_exec(|| {
                let value = std::ffi::CString::new(libc::getpid().to_string())
                    .map_err(std::io::Error::other)?;
                libc::setenv(c"GIO_LAUNCHED_DESKTOP_FILE_PID".as_ptr(), value.as_ptr(), 1);
                libc::setsid();
                Ok(())
            });
        }

        cmd.spawn()?;
        Ok(())
    }
}

fn set_env(env: &mut Vec<(String, String)>, key: &str, value: &str) {
    for entry in env.iter_mut() {
        if entry.0 == key {
            entry.1 = value.to_string();
            return;
        }
    }
    env.push((key.to_string(), value.to_string()));
}

/// Tilde and `$VAR`/`${VAR}` expansion for one word-split token.
fn expand_word(token: &str) -> String {
    let token = if token == "~" {
        paths::home_dir().to_string_lossy().into_owned()
    } else if let Some(rest) = token.strip_prefix("~/") {
        paths::home_dir().join(rest).to_string_lossy().into_owned()
    } else {
        token.to_string()
    };
    expand_variables(&token)
}

fn expand_variables(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&std::env::var(&name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capy_systemd::SystemdError;
    use futures_util::stream::{BoxStream, StreamExt};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use zbus::zvariant::OwnedObjectPath;

    // Tests that touch process environment serialize on this.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[derive(Default)]
    struct MockManager {
        calls: Mutex<Vec<(String, TransientUnit)>>,
    }

    #[async_trait]
    impl ServiceManager for MockManager {
        async fn start_transient_unit(
            &self,
            name: &str,
            unit: &TransientUnit,
        ) -> Result<OwnedObjectPath, SystemdError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((name.to_string(), unit.clone()));
            let path = format!("/org/freedesktop/systemd1/unit/u{}", calls.len());
            Ok(OwnedObjectPath::try_from(path).unwrap())
        }

        async fn stop_unit(&self, _name: &str) -> Result<OwnedObjectPath, SystemdError> {
            Ok(OwnedObjectPath::try_from("/org/freedesktop/systemd1/job/1").unwrap())
        }

        async fn unit_events(&self) -> Result<BoxStream<'static, capy_systemd::UnitEvent>, SystemdError> {
            Ok(futures_util::stream::pending().boxed())
        }
    }

    struct FixedProxy(&'static str);

    #[async_trait]
    impl ProxyConfig for FixedProxy {
        async fn proxy_message(&self) -> String {
            self.0.to_string()
        }
    }

    struct FixedScale(f64);

    #[async_trait]
    impl DisplayScale for FixedScale {
        async fn scale_factor(&self) -> f64 {
            self.0
        }
    }

    struct FixedGate(bool);

    impl MemoryGate for FixedGate {
        fn is_sufficient(&self, _min: u64, _max: u64) -> bool {
            self.0
        }
    }

    const EDITOR: &str = "\
[Desktop Entry]
Type=Application
Name=Editor
Exec=edit %U
Icon=editor
Actions=new-window;

[Desktop Action new-window]
Name=New Window
Exec=edit --new
";

    struct Fixture {
        _dir: TempDir,
        manager: Arc<MockManager>,
        launcher: Launcher,
        catalog: Arc<AppCatalog>,
        source_path: std::path::PathBuf,
    }

    fn fixture_with(settings: Settings, entry: &str, sufficient: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source_path = dir.path().join("org.example.Edit.desktop");
        fs::write(&source_path, entry).unwrap();

        let catalog = Arc::new(AppCatalog::new(vec![dir.path().to_path_buf()]));
        catalog.scan();

        let manager = Arc::new(MockManager::default());
        let launcher = Launcher::new(
            catalog.clone(),
            Arc::new(settings),
            Some(manager.clone()),
            Arc::new(FixedProxy("")),
            Arc::new(FixedScale(1.0)),
            Arc::new(FixedGate(sufficient)),
        );

        Fixture {
            _dir: dir,
            manager,
            launcher,
            catalog,
            source_path,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Settings::default(), EDITOR, true)
    }

    #[tokio::test]
    async fn launch_builds_the_expected_transient_unit() {
        let fx = fixture();
        let files = vec!["/tmp/a.txt".to_string(), "/tmp/b.txt".to_string()];

        let object_path = fx
            .launcher
            .launch("org.example.Edit", "", &files, &LaunchOptions::default())
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        let (name, unit) = &calls[0];

        assert!(name.starts_with("app-capyshell-org\\x2eexample\\x2eEdit@"));
        assert!(name.ends_with(".service"));
        assert_eq!(unit.argv, vec!["edit", "/tmp/a.txt /tmp/b.txt"]);

        let expected = format!(
            "GIO_LAUNCHED_DESKTOP_FILE={}",
            fx.source_path.to_string_lossy()
        );
        assert!(unit.environment.contains(&expected));

        // Returned object path carries the same instance id as the unit.
        let instance = name
            .rsplit_once('@')
            .map(|(_, tail)| tail.trim_end_matches(".service"))
            .unwrap();
        assert!(object_path.ends_with(instance));
    }

    #[tokio::test]
    async fn action_launch_uses_the_action_exec() {
        let fx = fixture();
        fx.launcher
            .launch("org.example.Edit", "new-window", &[], &LaunchOptions::default())
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        assert_eq!(calls[0].1.argv, vec!["edit", "--new"]);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let fx = fixture();
        let err = fx
            .launcher
            .launch("org.example.Edit", "ghost", &[], &LaunchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let fx = fixture();
        let err = fx
            .launcher
            .launch("ghost", "", &[], &LaunchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn empty_files_strip_file_codes() {
        let fx = fixture();
        fx.launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        assert_eq!(calls[0].1.argv, vec!["edit"]);
    }

    #[tokio::test]
    async fn terminal_entries_get_the_terminal_prefix() {
        let entry = "[Desktop Entry]\nType=Application\nName=Top\nExec=top\nTerminal=true\n";
        let fx = fixture_with(Settings::default(), entry, true);

        fx.launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        assert_eq!(calls[0].1.argv, vec!["xterm", "-e", "top"]);
    }

    #[tokio::test]
    async fn caller_env_option_wins_over_the_base_set() {
        let fx = fixture();
        let options = LaunchOptions {
            env: vec!["CAPY_TEST_MARKER=yes".to_string()],
            ..Default::default()
        };
        fx.launcher
            .launch("org.example.Edit", "", &[], &options)
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        assert!(calls[0]
            .1
            .environment
            .contains(&"CAPY_TEST_MARKER=yes".to_string()));
    }

    #[tokio::test]
    async fn proxy_variables_are_stripped_for_proxied_apps() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("http_proxy", "http://localhost:3128");
        }

        let mut settings = Settings::default();
        settings.use_proxy_apps.insert("org.example.Edit".to_string());
        let fx = fixture_with(settings, EDITOR, true);
        let launcher = Launcher::new(
            fx.catalog.clone(),
            fx.launcher.settings.clone(),
            Some(fx.manager.clone()),
            Arc::new(FixedProxy("proxy is up")),
            Arc::new(FixedScale(1.0)),
            Arc::new(FixedGate(true)),
        );

        launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap();

        unsafe {
            std::env::remove_var("http_proxy");
        }

        let calls = fx.manager.calls.lock().unwrap();
        let env = &calls.last().unwrap().1.environment;
        assert!(!env.iter().any(|e| e.starts_with("http_proxy=")));
    }

    #[tokio::test]
    async fn scale_factor_is_exported_unless_disabled() {
        let fx = fixture();
        let launcher = Launcher::new(
            fx.catalog.clone(),
            fx.launcher.settings.clone(),
            Some(fx.manager.clone()),
            Arc::new(FixedProxy("")),
            Arc::new(FixedScale(2.0)),
            Arc::new(FixedGate(true)),
        );
        launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        let env = &calls.last().unwrap().1.environment;
        assert!(env.contains(&"DEEPIN_WINE_SCALE=2".to_string()));

        let mut settings = Settings::default();
        settings
            .disable_scaling_apps
            .insert("org.example.Edit".to_string());
        drop(calls);
        let launcher = Launcher::new(
            fx.catalog.clone(),
            Arc::new(settings),
            Some(fx.manager.clone()),
            Arc::new(FixedProxy("")),
            Arc::new(FixedScale(2.0)),
            Arc::new(FixedGate(true)),
        );
        launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        let env = &calls.last().unwrap().1.environment;
        assert!(!env.iter().any(|e| e.starts_with("DEEPIN_WINE_SCALE=")));
    }

    #[tokio::test]
    async fn insufficient_memory_rejects_the_launch() {
        let fx = fixture_with(Settings::default(), EDITOR, false);
        let err = fx
            .launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LaunchRejected");
    }

    #[tokio::test]
    async fn override_exec_replaces_the_command() {
        let fx = fixture();
        let options = LaunchOptions {
            override_exec: Some("printf hello".to_string()),
            ..Default::default()
        };
        fx.launcher
            .launch("org.example.Edit", "", &[], &options)
            .await
            .unwrap();

        let calls = fx.manager.calls.lock().unwrap();
        assert_eq!(calls[0].1.argv, vec!["printf", "hello"]);
    }

    #[tokio::test]
    async fn entry_without_exec_is_empty_command() {
        let entry = "[Desktop Entry]\nType=Application\nName=Display Only\n";
        let fx = fixture_with(Settings::default(), entry, true);
        let err = fx
            .launcher
            .launch("org.example.Edit", "", &[], &LaunchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EmptyCommand");
    }

    #[test]
    fn variable_expansion() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("CAPY_EXPAND_TEST", "value");
        }
        assert_eq!(expand_variables("$CAPY_EXPAND_TEST"), "value");
        assert_eq!(expand_variables("${CAPY_EXPAND_TEST}/x"), "value/x");
        assert_eq!(expand_variables("a$-b"), "a$-b");
        assert_eq!(expand_variables("$CAPY_UNSET_TEST_VAR"), "");
        unsafe {
            std::env::remove_var("CAPY_EXPAND_TEST");
        }
    }

    #[test]
    fn word_splitting_preserves_quoting() {
        let tokens = shlex::split("sh -c 'echo hi there'").unwrap();
        assert_eq!(tokens, vec!["sh", "-c", "echo hi there"]);
    }
}
