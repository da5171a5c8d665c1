//! Native functions exposed to scripts.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use conduit_domain::TestResult;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;
use rquickjs::function::Opt;
use rquickjs::{Coerced, Ctx, Function, Object};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// What a script recorded so far; read back after the run.
#[derive(Debug, Default)]
pub struct HostState {
    env: BTreeMap<String, String>,
    /// Writes made with `setEnvVar`.
    pub env_changes: BTreeMap<String, String>,
    /// Lines passed to `log`.
    pub logs: Vec<String>,
    /// `test()` outcomes in call order.
    pub tests: Vec<TestResult>,
}

impl HostState {
    /// Creates a state over the variables visible to `getEnvVar`.
    #[must_use]
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self {
            env,
            ..Default::default()
        }
    }

    fn get(&self, name: &str) -> Option<String> {
        self.env_changes
            .get(name)
            .or_else(|| self.env.get(name))
            .cloned()
    }
}

/// Registers the native functions on the global object.
///
/// `deadline` bounds `sleep`, which would otherwise block past the
/// interrupt.
pub fn install(ctx: &Ctx<'_>, state: &Rc<RefCell<HostState>>, deadline: Instant) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let s = Rc::clone(state);
    globals.set(
        "getEnvVar",
        Function::new(ctx.clone(), move |name: Coerced<String>| s.borrow().get(&name.0))?,
    )?;

    let s = Rc::clone(state);
    globals.set(
        "setEnvVar",
        Function::new(ctx.clone(), move |name: Coerced<String>, value: Coerced<String>| {
            s.borrow_mut().env_changes.insert(name.0, value.0);
        })?,
    )?;

    let s = Rc::clone(state);
    globals.set(
        "__hostLog",
        Function::new(ctx.clone(), move |line: String| s.borrow_mut().logs.push(line))?,
    )?;

    let s = Rc::clone(state);
    globals.set(
        "__hostTest",
        Function::new(ctx.clone(), move |name: String, passed: bool, reason: Opt<String>| {
            let result = if passed {
                TestResult::pass(name)
            } else {
                TestResult::fail(name, reason.0.unwrap_or_default())
            };
            s.borrow_mut().tests.push(result);
        })?,
    )?;

    install_utilities(ctx, &globals, deadline)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn install_utilities<'js>(ctx: &Ctx<'js>, globals: &Object<'js>, deadline: Instant) -> rquickjs::Result<()> {
    globals.set(
        "base64Encode",
        Function::new(ctx.clone(), |text: Coerced<String>| STANDARD.encode(text.0.as_bytes()))?,
    )?;
    globals.set(
        "base64Decode",
        Function::new(ctx.clone(), |text: Coerced<String>| {
            STANDARD
                .decode(text.0.trim())
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })?,
    )?;
    globals.set(
        "sha256",
        Function::new(ctx.clone(), |text: Coerced<String>| hex::encode(Sha256::digest(text.0.as_bytes())))?,
    )?;
    globals.set(
        "md5",
        Function::new(ctx.clone(), |text: Coerced<String>| hex::encode(Md5::digest(text.0.as_bytes())))?,
    )?;
    globals.set(
        "hmacSha256",
        Function::new(ctx.clone(), |key: Coerced<String>, message: Coerced<String>| {
            hmac_sha256_hex(&key.0, &message.0)
        })?,
    )?;
    globals.set("uuid", Function::new(ctx.clone(), || Uuid::new_v4().to_string())?)?;
    globals.set("timestamp", Function::new(ctx.clone(), || Utc::now().timestamp())?)?;
    globals.set(
        "randomInt",
        Function::new(ctx.clone(), |min: f64, max: f64| random_int(min, max))?,
    )?;
    globals.set(
        "sleep",
        Function::new(ctx.clone(), move |millis: f64| {
            let requested = Duration::from_millis(millis.max(0.0) as u64);
            std::thread::sleep(requested.min(deadline.saturating_duration_since(Instant::now())));
        })?,
    )?;
    globals.set(
        "readFile",
        Function::new(ctx.clone(), |path: Coerced<String>| std::fs::read_to_string(path.0).ok())?,
    )?;
    Ok(())
}

/// Hex HMAC-SHA256 of `message` under `key`.
#[must_use]
pub fn hmac_sha256_hex(key: &str, message: &str) -> String {
    match Hmac::<Sha256>::new_from_slice(key.as_bytes()) {
        Ok(mut mac) => {
            mac.update(message.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Uniform integer in `[min, max]`; the bounds may come in either order.
#[allow(clippy::cast_possible_truncation)]
fn random_int(min: f64, max: f64) -> i64 {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    let (low, high) = (low.ceil() as i64, high.floor() as i64);
    if low >= high {
        return low;
    }
    rand::rng().random_range(low..=high)
}
