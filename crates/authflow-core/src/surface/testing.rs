//! Scripted surfaces for unit tests.

use async_trait::async_trait;
use regex::RegexBuilder;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{FetchResponse, Surface, SurfaceContext, SurfaceFactory};
use crate::error::{AutomationError, Result};

pub(crate) type Reaction = Arc<dyn Fn(&mut MockState) + Send + Sync>;

pub(crate) struct MockState {
    pub url: String,
    /// Main-frame texts; `body_text` advances while more than one remains.
    pub bodies: VecDeque<String>,
    /// Child frame texts.
    pub frames: Vec<String>,
    pub visible: HashSet<String>,
    /// Visible clickable controls by label.
    pub buttons: Vec<String>,
    pub enabled: Option<bool>,
    pub text_click_works: bool,
    pub fetch: VecDeque<FetchResponse>,
    pub reactions: HashMap<String, Reaction>,
    pub log: Vec<String>,
    pub popup: Option<Arc<MockSurface>>,
    pub popup_open: bool,
}

impl MockState {
    pub fn body(&self) -> String {
        self.bodies.front().cloned().unwrap_or_default()
    }

    pub fn set_body(&mut self, body: &str) {
        self.bodies = VecDeque::from([body.to_string()]);
    }

    pub fn show(&mut self, selectors: &[&str]) {
        self.visible.extend(selectors.iter().map(|s| s.to_string()));
    }

    pub fn hide(&mut self, selectors: &[&str]) {
        for s in selectors {
            self.visible.remove(*s);
        }
    }

    fn react(&mut self, event: &str) {
        self.log.push(event.to_string());
        if let Some(reaction) = self.reactions.get(event).cloned() {
            reaction(self);
        }
    }
}

pub(crate) struct MockSurface {
    id: String,
    state: Mutex<MockState>,
}

impl MockSurface {
    pub fn new(id: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            state: Mutex::new(MockState {
                url: url.to_string(),
                bodies: VecDeque::from([String::new()]),
                frames: Vec::new(),
                visible: HashSet::new(),
                buttons: Vec::new(),
                enabled: None,
                text_click_works: true,
                fetch: VecDeque::new(),
                reactions: HashMap::new(),
                log: Vec::new(),
                popup: None,
                popup_open: false,
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn on(&self, event: &str, reaction: impl Fn(&mut MockState) + Send + Sync + 'static) {
        self.state()
            .reactions
            .insert(event.to_string(), Arc::new(reaction));
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Frame texts as `frame_texts` would report them, without logging.
    pub fn frame_texts_now(&self) -> Vec<String> {
        let state = self.state();
        let mut texts = vec![state.body()];
        texts.extend(state.frames.iter().cloned());
        texts
    }

    fn button_matching(&self, pattern: &str, exclude: Option<&str>) -> Option<String> {
        let re = RegexBuilder::new(pattern).case_insensitive(true).build().ok()?;
        let ex = exclude.and_then(|e| RegexBuilder::new(e).case_insensitive(true).build().ok());
        self.state()
            .buttons
            .iter()
            .find(|b| re.is_match(b) && !ex.as_ref().is_some_and(|ex| ex.is_match(b)))
            .cloned()
    }
}

#[async_trait]
impl Surface for MockSurface {
    fn id(&self) -> &str {
        &self.id
    }

    async fn url(&self) -> Result<String> {
        Ok(self.state().url.clone())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.state();
        state.url = url.to_string();
        state.react(&format!("goto:{}", url));
        Ok(())
    }

    async fn any_visible(&self, selectors: &[String]) -> Result<bool> {
        let state = self.state();
        Ok(selectors.iter().any(|s| state.visible.contains(s)))
    }

    async fn fill(&self, selectors: &[String], _value: &str) -> Result<bool> {
        let mut state = self.state();
        let Some(selector) = selectors.iter().find(|s| state.visible.contains(*s)).cloned() else {
            return Ok(false);
        };
        state.react(&format!("fill:{}", selector));
        Ok(true)
    }

    async fn click(&self, selectors: &[String]) -> Result<bool> {
        let mut state = self.state();
        let Some(selector) = selectors.iter().find(|s| state.visible.contains(*s)).cloned() else {
            return Ok(false);
        };
        state.react(&format!("click:{}", selector));
        Ok(true)
    }

    async fn click_text(&self, pattern: &str, exclude: Option<&str>) -> Result<bool> {
        if !self.state().text_click_works {
            return Ok(false);
        }
        let Some(label) = self.button_matching(pattern, exclude) else {
            return Ok(false);
        };
        self.state().react(&format!("text:{}", label));
        Ok(true)
    }

    async fn click_button_role(&self, pattern: &str, exclude: Option<&str>) -> Result<bool> {
        let Some(label) = self.button_matching(pattern, exclude) else {
            return Ok(false);
        };
        self.state().react(&format!("role:{}", label));
        Ok(true)
    }

    async fn control_enabled(
        &self,
        _selectors: &[String],
        _text_pattern: Option<&str>,
    ) -> Result<Option<bool>> {
        Ok(self.state().enabled)
    }

    async fn body_text(&self) -> Result<String> {
        let mut state = self.state();
        if state.bodies.len() > 1 {
            let body = state.bodies.pop_front().unwrap_or_default();
            return Ok(body);
        }
        Ok(state.body())
    }

    async fn frame_texts(&self) -> Result<Vec<String>> {
        Ok(self.frame_texts_now())
    }

    async fn scroll_to_end(&self) -> Result<()> {
        self.state().react("scroll");
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.state().react(&format!("key:{}", key));
        Ok(())
    }

    async fn fetch_text(&self, url: &str, _headers: &[(String, String)]) -> Result<FetchResponse> {
        let mut state = self.state();
        state.react(&format!("fetch:{}", url));
        state
            .fetch
            .pop_front()
            .ok_or_else(|| AutomationError::Browser(anyhow::anyhow!("fetch failed: {}", url)))
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"png")?;
        Ok(())
    }
}

pub(crate) struct MockContext {
    id: String,
    prepared: Mutex<VecDeque<Arc<MockSurface>>>,
    opened: Mutex<Vec<Arc<MockSurface>>>,
    pub closed: AtomicBool,
}

impl MockContext {
    /// `surfaces` are handed out by `open_surface` in order.
    pub fn new(id: &str, surfaces: Vec<Arc<MockSurface>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            prepared: Mutex::new(surfaces.into()),
            opened: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SurfaceContext for MockContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open_surface(&self) -> Result<Arc<dyn Surface>> {
        let surface = self
            .prepared
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AutomationError::Browser(anyhow::anyhow!("no surface prepared")))?;
        self.opened.lock().unwrap().push(surface.clone());
        Ok(surface)
    }

    async fn surfaces(&self) -> Result<Vec<Arc<dyn Surface>>> {
        let opened = self.opened.lock().unwrap().clone();
        let mut all: Vec<Arc<dyn Surface>> = Vec::new();
        for surface in opened {
            let popup = {
                let state = surface.state();
                state.popup.clone().filter(|_| state.popup_open)
            };
            all.push(surface);
            if let Some(popup) = popup {
                all.push(popup);
            }
        }
        Ok(all)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct MockFactory {
    contexts: Mutex<VecDeque<Arc<MockContext>>>,
    pub created: Mutex<Vec<Arc<MockContext>>>,
}

impl MockFactory {
    pub fn new(contexts: Vec<Arc<MockContext>>) -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(contexts.into()),
            created: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SurfaceFactory for MockFactory {
    async fn new_context(&self) -> Result<Arc<dyn SurfaceContext>> {
        let context = self
            .contexts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AutomationError::Browser(anyhow::anyhow!("no context prepared")))?;
        self.created.lock().unwrap().push(context.clone());
        Ok(context)
    }
}
