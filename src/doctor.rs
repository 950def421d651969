use authflow_core::config::AppConfig;
use authflow_core::traits::Database;
use authflow_interaction::auth::{AuthIntent, AuthNode};
use authflow_interaction::engine::SAVEPOINT;
use authflow_store::{SqliteDatabase, SqliteKv};

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub async fn run_doctor(config: &AppConfig) {
    let checks = vec![
        check_config(config),
        check_store(config),
        check_savepoint(config).await,
        check_catalog(),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_config(config: &AppConfig) -> CheckResult {
    match config.validate() {
        Ok(()) => CheckResult {
            label: "Config".into(),
            ok: true,
            detail: format!(
                "graphs live {}s, prefix '{}'",
                config.interaction.graph_lifetime_secs, config.store.key_prefix
            ),
        },
        Err(e) => CheckResult {
            label: "Config".into(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

fn check_store(config: &AppConfig) -> CheckResult {
    let path = config.store_path();
    match SqliteKv::open(&path).and_then(|kv| kv.live_count()) {
        Ok(live) => CheckResult {
            label: "Graph store".into(),
            ok: true,
            detail: format!("{} ({} live rows)", path.display(), live),
        },
        Err(e) => CheckResult {
            label: "Graph store".into(),
            ok: false,
            detail: format!("{}: {}", path.display(), e),
        },
    }
}

/// Opens and rolls back the savepoint every run is wrapped in.
async fn check_savepoint(config: &AppConfig) -> CheckResult {
    let path = config.store_path();
    let db = match SqliteDatabase::open(&path) {
        Ok(db) => db,
        Err(e) => {
            return CheckResult {
                label: "Savepoints".into(),
                ok: false,
                detail: format!("{}: {}", path.display(), e),
            }
        }
    };

    let result = match db.begin_savepoint(SAVEPOINT).await {
        Ok(()) => db.rollback_to_savepoint(SAVEPOINT).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => CheckResult {
            label: "Savepoints".into(),
            ok: true,
            detail: format!("'{}' begins and rolls back", SAVEPOINT),
        },
        Err(e) => CheckResult {
            label: "Savepoints".into(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

fn check_catalog() -> CheckResult {
    let intents = AuthIntent::registry().kinds().len();
    let nodes = AuthNode::registry().kinds().len();
    CheckResult {
        label: "Catalog".into(),
        ok: intents > 0 && nodes > 0,
        detail: format!("{} intents, {} node kinds", intents, nodes),
    }
}
