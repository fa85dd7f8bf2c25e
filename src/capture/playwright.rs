//! Headless Chromium surface driven through Playwright.
//!
//! A single long-lived Node.js helper holds the browser page. Requests and
//! responses are line-delimited JSON on the helper's stdin/stdout, tagged with
//! an id so a response that arrives after its caller timed out is skipped.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use super::{DocumentSurface, NodeLayout, RenderRequest};
use crate::config::CaptureConfig;
use crate::{PrestoError, Result};

/// Helper loop: one JSON request per stdin line, one JSON response per stdout line.
pub(crate) const HELPER_SCRIPT: &str = r#"
const readline = require('readline');
const [, headlessFlag, width, height] = process.argv;

let browser;
let context;
let page;
let nextNode = 0;
const nodes = new Map();

function reply(id, payload) {
  process.stdout.write(JSON.stringify(Object.assign({ id }, payload)) + '\n');
}

function lookup(nodeId) {
  const el = nodes.get(nodeId);
  if (!el) {
    const err = new Error(`unknown node ${nodeId}`);
    err.status = 'not_found';
    throw err;
  }
  return el;
}

async function handle(msg) {
  switch (msg.op) {
    case 'open': {
      if (!browser) {
        const { chromium } = require('playwright');
        browser = await chromium.launch({ headless: headlessFlag !== '0' });
      }
      if (context) {
        await context.close();
      }
      context = await browser.newContext({
        viewport: { width: parseInt(width, 10), height: parseInt(height, 10) },
        deviceScaleFactor: msg.scale
      });
      page = await context.newPage();
      nodes.clear();
      await page.goto(msg.url, { waitUntil: 'networkidle', timeout: msg.timeoutMs });
      return { status: 'ok' };
    }
    case 'resolve': {
      if (!page) {
        return { status: 'error', message: 'no page is open' };
      }
      const el = await page.$(msg.selector);
      if (!el) {
        return { status: 'ok', found: false };
      }
      const box = await el.boundingBox();
      const visible = await el.isVisible();
      const nodeId = `node-${nextNode++}`;
      nodes.set(nodeId, el);
      return {
        status: 'ok',
        found: true,
        nodeId,
        width: box ? box.width : 0,
        height: box ? box.height : 0,
        visible
      };
    }
    case 'chrome': {
      const el = lookup(msg.nodeId);
      await el.evaluate((root, [selectors, hidden]) => {
        for (const selector of selectors) {
          for (const item of root.querySelectorAll(selector)) {
            if (hidden) {
              if (!('prestoVisibility' in item.dataset)) {
                item.dataset.prestoVisibility = item.style.visibility;
              }
              item.style.visibility = 'hidden';
            } else if ('prestoVisibility' in item.dataset) {
              item.style.visibility = item.dataset.prestoVisibility;
              delete item.dataset.prestoVisibility;
            }
          }
        }
      }, [msg.selectors, msg.hidden]);
      return { status: 'ok' };
    }
    case 'render': {
      const el = lookup(msg.nodeId);
      const blocked = await el.evaluate(async (root, [allowed, useCors]) => {
        const origins = new Set([location.origin, ...allowed]);
        const urls = [];
        const reloads = [];
        for (const img of root.querySelectorAll('img')) {
          const src = img.currentSrc || img.src;
          if (!src) continue;
          urls.push(src);
          const origin = new URL(src, location.href).origin;
          if (useCors && origin !== location.origin && origins.has(origin) && !img.crossOrigin) {
            img.crossOrigin = 'anonymous';
            img.src = src;
            reloads.push(img.decode().catch(() => undefined));
          }
        }
        await Promise.all(reloads);
        for (const item of [root, ...root.querySelectorAll('*')]) {
          const bg = getComputedStyle(item).backgroundImage || '';
          const re = /url\(["']?([^"')]+)["']?\)/g;
          let m;
          while ((m = re.exec(bg)) !== null) urls.push(m[1]);
        }
        for (const raw of urls) {
          if (raw.startsWith('data:') || raw.startsWith('blob:')) continue;
          if (!origins.has(new URL(raw, location.href).origin)) return raw;
        }
        return null;
      }, [msg.allowedOrigins, msg.useCors]);
      if (blocked) {
        return { status: 'cross_origin', url: blocked };
      }
      await el.evaluate((root, bg) => {
        root.dataset.prestoBackground = root.style.backgroundColor;
        root.style.backgroundColor = bg;
      }, msg.background);
      try {
        const png = await el.screenshot({ type: 'png', timeout: msg.timeoutMs });
        return { status: 'ok', png: png.toString('base64') };
      } finally {
        await el.evaluate((root) => {
          root.style.backgroundColor = root.dataset.prestoBackground || '';
          delete root.dataset.prestoBackground;
        });
      }
    }
    case 'close': {
      if (browser) {
        await browser.close();
        browser = undefined;
      }
      return { status: 'ok' };
    }
    default:
      return { status: 'error', message: `unknown op ${msg.op}` };
  }
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let msg;
  try {
    msg = JSON.parse(line);
  } catch (err) {
    reply(null, { status: 'error', message: 'invalid request line' });
    return;
  }
  try {
    reply(msg.id, await handle(msg));
    if (msg.op === 'close') {
      process.exit(0);
    }
  } catch (err) {
    const message = err && err.message ? err.message : String(err);
    let status = err && err.status ? err.status : 'error';
    if (/cannot find module 'playwright'/i.test(message)) {
      status = 'missing_playwright';
    } else if (err && err.name === 'TimeoutError') {
      status = 'timeout';
    }
    reply(msg.id, { status, message });
  }
});
rl.on('close', async () => {
  if (browser) {
    await browser.close();
  }
});
"#;

const PLAYWRIGHT_CHECK_SCRIPT: &str = "require('playwright'); process.stdout.write('ok');";
const NODE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PlaywrightOptions {
    /// The Node.js command to use (default: "node").
    pub node_command: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Timeout for page navigation in `open`.
    pub navigation_timeout: Duration,
    /// Upper bound for any single helper round-trip.
    pub request_timeout: Duration,
}

impl Default for PlaywrightOptions {
    fn default() -> Self {
        Self {
            node_command: "node".to_string(),
            headless: true,
            viewport_width: 1440,
            viewport_height: 900,
            navigation_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(45),
        }
    }
}

impl From<&CaptureConfig> for PlaywrightOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            node_command: config.node_command.clone(),
            headless: config.headless,
            request_timeout: config.timeout.max(Duration::from_secs(1)) * 2,
            ..Self::default()
        }
    }
}

struct Helper {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A [`DocumentSurface`] backed by a page in headless Chromium.
pub struct PlaywrightSurface {
    options: PlaywrightOptions,
    helper: Mutex<Helper>,
    next_id: AtomicU64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelperResponse {
    id: Option<u64>,
    status: String,
    message: Option<String>,
    found: Option<bool>,
    node_id: Option<String>,
    width: Option<f64>,
    height: Option<f64>,
    visible: Option<bool>,
    png: Option<String>,
    url: Option<String>,
}

impl PlaywrightSurface {
    /// Spawn the helper process. The browser itself starts on the first `open`.
    pub async fn launch(options: PlaywrightOptions) -> Result<Self> {
        ensure_node_available(&options.node_command).await?;
        ensure_playwright_available(&options.node_command).await?;

        let mut cmd = Command::new(&options.node_command);
        cmd.arg("-e")
            .arg(HELPER_SCRIPT)
            .arg(if options.headless { "1" } else { "0" })
            .arg(options.viewport_width.to_string())
            .arg(options.viewport_height.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| map_spawn_error(err, &options.node_command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PrestoError::Config("Playwright helper has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PrestoError::Config("Playwright helper has no stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "presto::playwright", "{}", line);
                }
            });
        }

        debug!(node = %options.node_command, headless = options.headless, "Playwright helper started");
        Ok(Self {
            options,
            helper: Mutex::new(Helper {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Navigate to `url` and wait for network idle. `scale` becomes the
    /// device pixel ratio of every later render on this page.
    pub async fn open(&self, url: &str, scale: f32) -> Result<()> {
        let params = json!({
            "url": url,
            "scale": scale,
            "timeoutMs": self.options.navigation_timeout.as_millis() as u64,
        });
        self.call("open", params).await?;
        debug!(%url, scale, "Page opened");
        Ok(())
    }

    /// Close the browser and wait for the helper to exit.
    pub async fn close(&self) -> Result<()> {
        let closed = self.call("close", json!({})).await;
        let mut helper = self.helper.lock().await;
        match timeout(CLOSE_TIMEOUT, helper.child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(PrestoError::Io(err)),
            Err(_) => {
                warn!("Playwright helper did not exit; killing it");
                let _ = helper.child.kill().await;
            }
        }
        closed.map(|_| ())
    }

    async fn call(&self, op: &str, mut params: Value) -> Result<HelperResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        params["id"] = json!(id);
        params["op"] = json!(op);
        let mut line = serde_json::to_string(&params)?;
        line.push('\n');

        let mut helper = self.helper.lock().await;
        helper.stdin.write_all(line.as_bytes()).await?;
        helper.stdin.flush().await?;

        loop {
            let next = timeout(self.options.request_timeout, helper.stdout.next_line())
                .await
                .map_err(|_| {
                    PrestoError::Config(format!(
                        "Playwright helper timed out after {:?} waiting for '{}'",
                        self.options.request_timeout, op
                    ))
                })??;
            let Some(raw) = next else {
                return Err(PrestoError::Config(
                    "Playwright helper exited unexpectedly".to_string(),
                ));
            };
            let response: HelperResponse = match serde_json::from_str(&raw) {
                Ok(response) => response,
                Err(_) => {
                    debug!(line = %raw, "Ignoring non-protocol helper output");
                    continue;
                }
            };
            if response.id != Some(id) {
                debug!(expected = id, got = ?response.id, "Skipping stale helper response");
                continue;
            }
            return map_helper_response(response, self.options.request_timeout);
        }
    }
}

#[async_trait]
impl DocumentSurface for PlaywrightSurface {
    async fn resolve(&self, selector: &str) -> Result<Option<NodeLayout>> {
        let response = self.call("resolve", json!({ "selector": selector })).await?;
        if !response.found.unwrap_or(false) {
            return Ok(None);
        }
        let node_id = response.node_id.ok_or_else(|| {
            PrestoError::Config("Playwright helper resolved a node without an id".to_string())
        })?;
        Ok(Some(NodeLayout {
            node_id,
            width: response.width.unwrap_or(0.0),
            height: response.height.unwrap_or(0.0),
            visible: response.visible.unwrap_or(false),
        }))
    }

    async fn set_chrome_hidden(
        &self,
        node: &NodeLayout,
        selectors: &[String],
        hidden: bool,
    ) -> Result<()> {
        self.call(
            "chrome",
            json!({ "nodeId": node.node_id, "selectors": selectors, "hidden": hidden }),
        )
        .await
        .map(|_| ())
    }

    async fn render(&self, node: &NodeLayout, request: &RenderRequest) -> Result<DynamicImage> {
        let params = render_params(node, request, self.options.request_timeout)?;
        let response = self.call("render", params).await?;
        let encoded = response.png.ok_or_else(|| {
            PrestoError::Config("Playwright returned ok status but no image data".to_string())
        })?;
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            PrestoError::Config(format!("Playwright returned invalid image data: {}", e))
        })?;
        Ok(image::load_from_memory_with_format(&bytes, ImageFormat::Png)?)
    }
}

/// Allow-listed origins in the `scheme://host[:port]` form the page compares
/// against. Same-origin assets are always permitted by the helper.
pub(crate) fn permitted_origins(allowed: &[String]) -> Result<Vec<String>> {
    allowed
        .iter()
        .map(|raw| {
            let parsed = Url::parse(raw.trim()).map_err(|e| {
                PrestoError::Config(format!("invalid allowed origin {:?}: {}", raw, e))
            })?;
            match parsed.origin() {
                origin @ url::Origin::Tuple(..) => Ok(origin.ascii_serialization()),
                url::Origin::Opaque(_) => Err(PrestoError::Config(format!(
                    "allowed origin {:?} has no host",
                    raw
                ))),
            }
        })
        .collect()
}

/// `use_cors` only decides whether allow-listed images are reloaded with
/// CORS; the allow-list applies either way.
fn render_params(
    node: &NodeLayout,
    request: &RenderRequest,
    request_timeout: Duration,
) -> Result<Value> {
    let [r, g, b] = request.background;
    Ok(json!({
        "nodeId": node.node_id,
        "useCors": request.use_cors,
        "allowedOrigins": permitted_origins(&request.allowed_origins)?,
        "background": format!("#{r:02x}{g:02x}{b:02x}"),
        "timeoutMs": request_timeout.as_millis() as u64,
    }))
}

fn map_helper_response(response: HelperResponse, request_timeout: Duration) -> Result<HelperResponse> {
    match response.status.as_str() {
        "ok" => Ok(response),
        "not_found" => Err(PrestoError::TargetNotFound(
            response.message.unwrap_or_else(|| "node is detached".to_string()),
        )),
        "cross_origin" => Err(PrestoError::CrossOriginAsset {
            url: response.url.unwrap_or_default(),
        }),
        "timeout" => Err(PrestoError::CaptureTimeout(request_timeout)),
        status => Err(map_playwright_status_error(
            status,
            response.message.unwrap_or_default(),
        )),
    }
}

/// Maps a spawn error to an appropriate PrestoError.
pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> PrestoError {
    if err.kind() == io::ErrorKind::NotFound {
        PrestoError::UnsupportedEnvironment(format!(
            "Unable to spawn Playwright helper; '{}' was not found on PATH",
            command
        ))
    } else {
        PrestoError::Io(err)
    }
}

/// Maps Playwright stderr output to an appropriate PrestoError.
pub(crate) fn map_playwright_error(status_text: impl Into<String>, stderr: &str) -> PrestoError {
    if stderr
        .to_ascii_lowercase()
        .contains("cannot find module 'playwright'")
    {
        return missing_playwright();
    }

    PrestoError::Config(format!(
        "Playwright exited with status {}: {}",
        status_text.into(),
        stderr.trim()
    ))
}

/// Maps a Playwright status error to an appropriate PrestoError.
pub(crate) fn map_playwright_status_error(status: &str, message: String) -> PrestoError {
    let lower = message.to_ascii_lowercase();
    if status == "missing_playwright" || lower.contains("cannot find module 'playwright'") {
        missing_playwright()
    } else if lower.contains("executable doesn't exist") {
        PrestoError::UnsupportedEnvironment(
            "Chromium executable is missing; run `npx playwright install chromium`".to_string(),
        )
    } else {
        PrestoError::Config(format!("Playwright error (status {}): {}", status, message))
    }
}

fn missing_playwright() -> PrestoError {
    PrestoError::UnsupportedEnvironment(
        "Playwright npm package is missing; install with `npm install playwright`.".to_string(),
    )
}

/// Ensures Node.js is available on the system.
pub(crate) async fn ensure_node_available(node_command: &str) -> Result<()> {
    let mut cmd = Command::new(node_command);
    cmd.arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let status = timeout(NODE_CHECK_TIMEOUT, cmd.status())
        .await
        .map_err(|_| {
            PrestoError::Config(format!(
                "Timed out checking node availability after {:?}",
                NODE_CHECK_TIMEOUT
            ))
        })?
        .map_err(|err| map_spawn_error(err, node_command))?;

    if !status.success() {
        return Err(PrestoError::UnsupportedEnvironment(format!(
            "Node command {:?} is not available (exit {})",
            node_command, status
        )));
    }

    Ok(())
}

/// Ensures the Playwright npm package is installed.
pub(crate) async fn ensure_playwright_available(node_command: &str) -> Result<()> {
    let mut cmd = Command::new(node_command);
    cmd.arg("-e")
        .arg(PLAYWRIGHT_CHECK_SCRIPT)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let output = timeout(NODE_CHECK_TIMEOUT, cmd.output())
        .await
        .map_err(|_| {
            PrestoError::Config(format!(
                "Timed out checking Playwright availability after {:?}",
                NODE_CHECK_TIMEOUT
            ))
        })?
        .map_err(|err| map_spawn_error(err, node_command))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(map_playwright_error(
            format!("{:?}", output.status),
            &stderr,
        ));
    }

    Ok(())
}
