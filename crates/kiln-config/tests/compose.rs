//! Composition properties across entry shapes and repeated calls.

use kiln_config::{
    compose, BuildConfiguration, BuildOptions, Entry, EntryPoint, Environment, Mode,
    HOT_MODULE_REPLACEMENT, NAMED_MODULES, UGLIFY_JS,
};
use serde_json::{json, Value};

const CLIENT: &str = "/proj/.kiln/hmr-client.js?http://localhost:5050";
const RUNTIME: &str = "webpack/hot/only-dev-server";
const SHIM: &str = "react-hot-loader/patch";

fn hot() -> BuildOptions {
    BuildOptions::new("/proj")
        .with_mode(Mode::Hot)
        .with_dev_server_port(5050)
}

fn base_with_entry(entry: Value) -> Value {
    json!({
        "entry": entry,
        "output": {"path": "/proj/build", "publicPath": "/assets/"},
        "plugins": [{"name": "LoaderOptionsPlugin", "options": {"postcss": []}}]
    })
}

fn compose_twice(base: &Value, options: &BuildOptions) -> (BuildConfiguration, BuildConfiguration) {
    let once = compose(base, options).unwrap();
    let twice = compose(&once.to_value(), options).unwrap();
    (once, twice)
}

#[test]
fn string_entry_gets_prelude() {
    let config = compose(&base_with_entry(json!("./app/client/index.js")), &hot()).unwrap();
    assert_eq!(
        config.entry,
        Entry::List(vec![
            CLIENT.to_string(),
            RUNTIME.to_string(),
            SHIM.to_string(),
            "./app/client/index.js".to_string(),
        ])
    );
}

#[test]
fn list_entry_gets_prelude_and_keeps_order() {
    let config = compose(&base_with_entry(json!(["./polyfills.js", "./index.js"])), &hot()).unwrap();
    assert_eq!(
        config.entry.modules(),
        vec![CLIENT, RUNTIME, SHIM, "./polyfills.js", "./index.js"]
    );
}

#[test]
fn named_entry_gets_prelude_per_bundle() {
    let config = compose(
        &base_with_entry(json!({"client": "./client.js", "admin": ["./admin.js", "./extra.js"]})),
        &hot(),
    )
    .unwrap();

    let Entry::Named(bundles) = config.entry else {
        panic!("named entries must stay named");
    };
    assert_eq!(
        bundles["client"],
        EntryPoint::List(vec![
            CLIENT.to_string(),
            RUNTIME.to_string(),
            SHIM.to_string(),
            "./client.js".to_string()
        ])
    );
    assert_eq!(
        bundles["admin"].modules(),
        vec![CLIENT, RUNTIME, SHIM, "./admin.js", "./extra.js"]
    );
}

#[test]
fn hot_composition_is_idempotent_for_every_shape() {
    for entry in [
        json!("./index.js"),
        json!(["./a.js", "./b.js"]),
        json!({"client": "./c.js", "admin": ["./a.js"]}),
    ] {
        let (once, twice) = compose_twice(&base_with_entry(entry), &hot());
        assert_eq!(once.entry, twice.entry);
        assert_eq!(once.plugins, twice.plugins);
        assert_eq!(once.output.public_path, twice.output.public_path);
        assert_eq!(
            twice
                .plugins
                .iter()
                .filter(|p| p.name == HOT_MODULE_REPLACEMENT)
                .count(),
            1
        );
    }
}

#[test]
fn normal_composition_is_idempotent() {
    for environment in [Environment::Development, Environment::Production] {
        let options = BuildOptions::new("/proj").with_environment(environment);
        let (once, twice) = compose_twice(&base_with_entry(json!("./index.js")), &options);
        assert_eq!(once, twice);
    }
}

#[test]
fn optimizing_plugins_are_mutually_exclusive() {
    let base = base_with_entry(json!("./index.js"));
    let dev = compose(&base, &BuildOptions::new("/proj")).unwrap();
    let prod = compose(
        &dev.to_value(),
        &BuildOptions::new("/proj").with_environment(Environment::Production),
    )
    .unwrap();

    assert!(prod.has_plugin(UGLIFY_JS));
    assert!(!prod.has_plugin(NAMED_MODULES));
}

#[test]
fn base_plugins_and_unknown_fields_survive() {
    let mut base = base_with_entry(json!("./index.js"));
    base["devtool"] = json!("source-map");

    let config = compose(&base, &hot()).unwrap();
    assert_eq!(config.plugins[0].name, "LoaderOptionsPlugin");
    assert_eq!(config.to_value()["devtool"], "source-map");
}

#[test]
fn bad_entry_shape_is_a_configuration_error() {
    let err = compose(&base_with_entry(json!(12)), &hot()).unwrap_err();
    assert!(err.to_string().contains("unrecognized entry shape"));
}
