//! End-to-end pipeline runs against a local catalog server and fake tools

mod helpers;

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use helpers::{fake_hdiutil, fake_installer, isolate_from_proxies, write_script, FixtureServer};
use osreinstaller::config::PipelineConfig;
use osreinstaller::install::{PtySpawner, TerminalMode};
use osreinstaller::models::{EventSink, ProgressEvent, Stage};
use osreinstaller::pipeline::Pipeline;
use osreinstaller::PipelineError;

const PAYLOAD: &[u8] = b"fake installer payload";

const STARTOSINSTALL_OK: &str = "echo 'By using the agreetolicense option, you are agreeing'\n\
echo 'Preparing to run macOS Installer...'\n\
echo 'Preparing 42.0.'\n\
echo 'System going down for install'\n\
exit 0\n";

const STARTOSINSTALL_FAILS: &str = "echo 'Preparing to run macOS Installer...'\n\
echo 'Error: could not find a volume to install to'\n\
exit 1\n";

/// Catalog with two products: A is an ordinary update, only B carries the
/// OS installer marker
fn catalog(server: &FixtureServer) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CatalogVersion</key>
    <integer>2</integer>
    <key>Products</key>
    <dict>
        <key>001-00001</key>
        <dict>
            <key>ServerMetadataURL</key>
            <string>{a_smd}</string>
            <key>Distributions</key>
            <dict>
                <key>English</key>
                <string>{a_dist}</string>
            </dict>
            <key>Packages</key>
            <array>
                <dict>
                    <key>URL</key>
                    <string>{a_pkg}</string>
                    <key>Size</key>
                    <integer>22</integer>
                </dict>
            </array>
            <key>PostDate</key>
            <date>2023-01-01T00:00:00Z</date>
        </dict>
        <key>012-92138</key>
        <dict>
            <key>ServerMetadataURL</key>
            <string>{b_smd}</string>
            <key>Distributions</key>
            <dict>
                <key>en</key>
                <string>{b_dist_en}</string>
                <key>English</key>
                <string>{b_dist}</string>
            </dict>
            <key>Packages</key>
            <array>
                <dict>
                    <key>URL</key>
                    <string>{b_pkg}</string>
                    <key>MetadataURL</key>
                    <string>{b_pkm}</string>
                    <key>Size</key>
                    <integer>22</integer>
                </dict>
            </array>
            <key>PostDate</key>
            <date>2022-10-24T17:00:00Z</date>
            <key>ExtendedMetaInfo</key>
            <dict>
                <key>InstallAssistantPackageIdentifiers</key>
                <dict>
                    <key>OSInstall</key>
                    <string>com.apple.mpkg.OSInstall</string>
                </dict>
            </dict>
        </dict>
    </dict>
</dict>
</plist>
"#,
        a_smd = server.url("/a/001-00001.smd"),
        a_dist = server.url("/a/001-00001.English.dist"),
        a_pkg = server.url("/a/Update.pkg"),
        b_smd = server.url("/b/012-92138.smd"),
        b_dist_en = server.url("/b/012-92138.en.dist"),
        b_dist = server.url("/b/012-92138.English.dist"),
        b_pkg = server.url("/b/InstallAssistantAuto.pkg"),
        b_pkm = server.url("/b/InstallAssistantAuto.pkm"),
    )
}

const SERVER_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>CFBundleShortVersionString</key>
    <string>12.6.1</string>
    <key>localization</key>
    <dict>
        <key>English</key>
        <dict>
            <key>title</key>
            <string>macOS Monterey</string>
        </dict>
    </dict>
</dict>
</plist>
"#;

const DISTRIBUTION: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<installer-gui-script minSpecVersion="2">
    <title>SU_TITLE</title>
    <auxinfo>
        <dict>
            <key>BUILD</key>
            <string>21G217</string>
            <key>VERSION</key>
            <string>12.6.1</string>
        </dict>
    </auxinfo>
</installer-gui-script>
"#;

fn serve_fixtures() -> FixtureServer {
    isolate_from_proxies();
    let server = FixtureServer::start();
    server.add("/catalogs/index.sucatalog", catalog(&server));
    server.add("/b/012-92138.smd", SERVER_METADATA);
    server.add("/b/012-92138.English.dist", DISTRIBUTION);
    server.add("/b/InstallAssistantAuto.pkg", PAYLOAD);
    server.add("/b/InstallAssistantAuto.pkm", "<pkm/>");
    server
}

fn config_for(server: &FixtureServer, root: &Path, installer_exit: i32) -> PipelineConfig {
    let tools = root.join("tools");
    let mounts = root.join("mnt");
    fs::create_dir_all(&tools).expect("mkdir tools");
    fs::create_dir_all(&mounts).expect("mkdir mnt");

    let mut config = PipelineConfig::default();
    config.catalog.url = server.url("/catalogs/index.sucatalog");
    config.paths.workdir = root.join("work");
    config.paths.mount_root = mounts;
    config.tools.hdiutil = fake_hdiutil(&tools);
    config.tools.installer = fake_installer(&tools, STARTOSINSTALL_OK, installer_exit);
    config.behavior.terminal = TerminalMode::Pty;
    config.behavior.line_timeout_secs = Some(30);
    config.validate().expect("valid config");
    config
}

fn pipeline(config: PipelineConfig, events: EventSink) -> Pipeline {
    Pipeline::with_spawner(
        config,
        Box::new(PtySpawner),
        events,
        Arc::new(AtomicBool::new(false)),
    )
    .expect("pipeline")
}

#[test]
fn test_download_selects_marked_product_and_ignores_other() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let config = config_for(&server, root.path(), 0);
    let workdir = config.paths.workdir.clone();

    let outcome = pipeline(config, EventSink::silent())
        .download(None)
        .expect("download succeeds");

    assert_eq!(outcome.product.product_id, "012-92138");
    assert_eq!(outcome.product.title, "macOS Monterey");
    assert_eq!(outcome.product.version, "12.6.1");
    assert_eq!(outcome.product.build.as_deref(), Some("21G217"));
    assert_eq!(outcome.failed_downloads, 0);
    assert_eq!(
        outcome.image,
        workdir.join("Install_macOS_12.6.1-21G217.sparseimage")
    );
    assert!(outcome.installer_app.ends_with("Applications/Install macOS Monterey.app"));

    // Product A is never touched, and English wins over en
    let requests = server.requests();
    assert!(requests.iter().all(|path| !path.starts_with("/a/")), "{:?}", requests);
    assert!(!requests.contains(&"/b/012-92138.en.dist".to_string()));

    assert_eq!(
        fs::read(workdir.join("b/InstallAssistantAuto.pkg")).expect("payload replicated"),
        PAYLOAD
    );
    assert!(workdir.join("b/InstallAssistantAuto.pkm").is_file());

    let detached = fs::read_to_string(root.path().join("tools/detach.log")).expect("volume detached");
    assert!(detached.contains("dmg.fixture"));
}

#[test]
fn test_download_twice_reuses_image_path() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let config = config_for(&server, root.path(), 0);

    let first = pipeline(config.clone(), EventSink::silent())
        .download(None)
        .expect("first download");
    let second = pipeline(config, EventSink::silent())
        .download(None)
        .expect("second download replaces the stale image");
    assert_eq!(first.image, second.image);
}

#[test]
fn test_download_exports_compressed_image() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let config = config_for(&server, root.path(), 0);
    let dmg = root.path().join("Install macOS Monterey.dmg");

    let outcome = pipeline(config, EventSink::silent())
        .download(Some(&dmg))
        .expect("download succeeds");

    assert_eq!(outcome.compressed_image.as_deref(), Some(dmg.as_path()));
    assert!(dmg.exists());
}

#[test]
fn test_installer_failure_unmounts_and_reports_stage() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let config = config_for(&server, root.path(), 1);

    let result = pipeline(config, EventSink::silent()).download(None);

    match result {
        Err(PipelineError::Install { stage, .. }) => assert_eq!(stage, Stage::Install),
        other => panic!("expected install failure, got {:?}", other.map(|o| o.product.product_id)),
    }
    let detached = fs::read_to_string(root.path().join("tools/detach.log")).expect("volume detached");
    assert!(detached.contains("dmg.fixture"));
}

fn assert_detached(root: &Path) {
    let detached = fs::read_to_string(root.join("tools/detach.log")).expect("volume detached");
    assert!(detached.contains("dmg.fixture"), "{}", detached);
}

#[test]
fn test_missing_installer_app_unmounts() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let mut config = config_for(&server, root.path(), 0);
    // Installs cleanly but lays down no application bundle
    config.tools.installer = write_script(
        &root.path().join("tools"),
        "installer",
        "echo 'installer:PHASE:Preparing for installation'\necho 'installer:%100'\nexit 0\n",
    );

    let result = pipeline(config, EventSink::silent()).download(None);

    match result {
        Err(PipelineError::InstallerAppNotFound { dir }) => assert!(dir.ends_with("Applications")),
        other => panic!("expected missing app, got {:?}", other.map(|o| o.product.product_id)),
    }
    assert_detached(root.path());
}

#[test]
fn test_erase_install_failure_unmounts() {
    if !PtySpawner::probe() {
        return;
    }
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let mut config = config_for(&server, root.path(), 0);
    config.tools.installer = fake_installer(&root.path().join("tools"), STARTOSINSTALL_FAILS, 0);

    let result = pipeline(config, EventSink::silent()).run();

    match result {
        Err(PipelineError::Install { stage, source }) => {
            assert_eq!(stage, Stage::EraseInstall);
            assert_eq!(
                source.log(),
                &[
                    "Preparing to run macOS Installer...".to_string(),
                    "Error: could not find a volume to install to".to_string(),
                ]
            );
        }
        other => panic!("expected erase-install failure, got {:?}", other.map(|o| o.product.product_id)),
    }
    assert_detached(root.path());
}

#[test]
fn test_missing_catalog_is_fatal() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let mut config = config_for(&server, root.path(), 0);
    config.catalog.url = server.url("/catalogs/missing.sucatalog");

    let result = pipeline(config, EventSink::silent()).list_products();
    assert!(matches!(
        result,
        Err(PipelineError::Fetch { stage: Stage::Catalog, .. })
    ));
}

#[test]
fn test_list_products_only_lists_installers() {
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let config = config_for(&server, root.path(), 0);

    let products = pipeline(config, EventSink::silent())
        .list_products()
        .expect("list succeeds");

    let ids: Vec<_> = products.iter().map(|p| p.product_id.as_str()).collect();
    assert_eq!(ids, vec!["012-92138"]);
    assert_eq!(products[0].post_date, "2022-10-24T17:00:00Z");
}

#[test]
fn test_run_reaches_restart_marker() {
    if !PtySpawner::probe() {
        return;
    }
    let server = serve_fixtures();
    let root = tempfile::tempdir().expect("temp dir");
    let config = config_for(&server, root.path(), 0);

    let (events, receiver) = EventSink::channel();
    let outcome = pipeline(config, events).run().expect("run succeeds");
    let received: Vec<_> = receiver.iter().collect();

    assert_eq!(outcome.product.product_id, "012-92138");

    let stages: Vec<_> = received
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Stage(stage) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            Stage::Catalog,
            Stage::Resolve,
            Stage::Fetch,
            Stage::Image,
            Stage::Install,
            Stage::LocateApp,
            Stage::EraseInstall,
        ]
    );

    assert!(received.contains(&ProgressEvent::Percent(25.5)));
    assert!(received.contains(&ProgressEvent::Percent(42.0)));
    assert!(received.contains(&ProgressEvent::Phase(
        "System will restart and begin install of macOS.".to_string()
    )));
    assert_eq!(received.last(), Some(&ProgressEvent::Status("done".to_string())));
}
