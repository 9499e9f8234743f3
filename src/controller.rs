//! Page-level orchestration
//!
//! The controller discovers activation points on the host page, wires them
//! to agent settings from the backend, opens and closes the call overlay,
//! and resets per-call state on teardown. It is the single integration
//! surface a host embeds; nothing in here panics across that boundary.

use crate::fields::FieldCollector;
use crate::overlay::{DraggableOverlay, Position};
use crate::protocol::SessionState;
use crate::report::CallReporter;
use crate::session::{BridgeHooks, SessionBridge};
use crate::settings::{AgentSettings, SettingsClient, WidgetSettings};
use crate::transport::TransportFactory;
use crate::typewriter::TranscriptTypewriter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Container element the widget injects into the host page when absent.
pub const WIDGET_CONTAINER_ID: &str = "nv_widget";

/// Function-call name that opens the booking overlay.
const FN_MEETING: &str = "meeting";

/// What the widget needs to know about the page embedding it.
pub trait HostPage: Send + Sync {
    /// Whether an element with this id exists on the page.
    fn has_element(&self, id: &str) -> bool;
    fn page_origin(&self) -> String;
    fn page_path(&self) -> String;
    /// Origin the widget script itself was loaded from, when known.
    fn script_origin(&self) -> Option<String>;
    /// Inject the widget's own container element if it is missing.
    fn ensure_container(&self, id: &str);
}

/// Host page with a fixed element list; used by the simulator and tests.
pub struct StaticHostPage {
    origin: String,
    path: String,
    script_origin: Option<String>,
    elements: Vec<String>,
    containers: Mutex<Vec<String>>,
}

impl StaticHostPage {
    pub fn new<I, S>(origin: impl Into<String>, path: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origin: origin.into(),
            path: path.into(),
            script_origin: None,
            elements: elements.into_iter().map(Into::into).collect(),
            containers: Mutex::new(Vec::new()),
        }
    }

    pub fn injected_containers(&self) -> Vec<String> {
        self.containers.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl HostPage for StaticHostPage {
    fn has_element(&self, id: &str) -> bool {
        self.elements.iter().any(|e| e == id)
    }

    fn page_origin(&self) -> String {
        self.origin.clone()
    }

    fn page_path(&self) -> String {
        self.path.clone()
    }

    fn script_origin(&self) -> Option<String> {
        self.script_origin.clone()
    }

    fn ensure_container(&self, id: &str) {
        if let Ok(mut containers) = self.containers.lock()
            && !containers.iter().any(|c| c == id)
        {
            containers.push(id.to_string());
        }
    }
}

/// UI-facing overlay state the host renders from.
#[derive(Debug, Clone, Default)]
pub struct OverlayUi {
    pub visible: bool,
    pub booking_visible: bool,
    pub character_name: String,
    pub character_image: Option<String>,
    pub booking_url: Option<String>,
}

pub struct WidgetController {
    host: Arc<dyn HostPage>,
    settings: SettingsClient,
    bridge: SessionBridge,
    typewriter: Arc<TranscriptTypewriter>,
    fields: Arc<Mutex<FieldCollector>>,
    overlay: Arc<Mutex<OverlayUi>>,
    position: Mutex<DraggableOverlay>,
    bindings: Mutex<HashMap<String, AgentSettings>>,
    line_pump: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on teardown; lines stamped with an older value are stale.
    call_gen: Arc<AtomicU64>,
    /// Serializes line rendering against teardown so a stale line can
    /// never start revealing into a freshly cleared viewport.
    render_gate: Arc<Mutex<()>>,
}

impl WidgetController {
    /// Wire up the controller and its collaborators.
    ///
    /// Must run inside a tokio runtime: the transcript line pump is
    /// spawned here.
    pub fn new(
        host: Arc<dyn HostPage>,
        settings: SettingsClient,
        factory: TransportFactory,
        reporter: Arc<dyn CallReporter>,
        typewriter: TranscriptTypewriter,
        position: DraggableOverlay,
    ) -> Self {
        let typewriter = Arc::new(typewriter);
        let fields: Arc<Mutex<FieldCollector>> = Arc::new(Mutex::new(FieldCollector::new()));
        let overlay: Arc<Mutex<OverlayUi>> = Arc::new(Mutex::new(OverlayUi::default()));

        let dispatch_overlay = Arc::clone(&overlay);
        let snapshot_fields = Arc::clone(&fields);
        let call_gen = Arc::new(AtomicU64::new(0));
        let render_gate: Arc<Mutex<()>> = Arc::new(Mutex::new(()));
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();

        // Each line carries the call generation current when the bridge
        // forwarded it; the pump drops lines from ended calls.
        let sink_gen = Arc::clone(&call_gen);
        let hooks = BridgeHooks {
            on_function_call: Arc::new(move |name| {
                dispatch_function_call(&dispatch_overlay, name);
            }),
            lines: Some(Arc::new(move |line| {
                let _ = line_tx.send((sink_gen.load(Ordering::SeqCst), line));
            })),
            fields_snapshot: Arc::new(move || {
                snapshot_fields
                    .lock()
                    .map(|f| f.snapshot())
                    .unwrap_or_default()
            }),
            reporter,
        };
        let bridge = SessionBridge::new(factory, hooks);

        let pump_typewriter = Arc::clone(&typewriter);
        let pump_gen = Arc::clone(&call_gen);
        let pump_gate = Arc::clone(&render_gate);
        let line_pump = tokio::spawn(async move {
            while let Some((generation, line)) = line_rx.recv().await {
                if let Ok(_gate) = pump_gate.lock()
                    && generation == pump_gen.load(Ordering::SeqCst)
                {
                    pump_typewriter.line_appended(&line);
                }
            }
        });

        Self {
            host,
            settings,
            bridge,
            typewriter,
            fields,
            overlay,
            position: Mutex::new(position),
            bindings: Mutex::new(HashMap::new()),
            line_pump: Mutex::new(Some(line_pump)),
            call_gen,
            render_gate,
        }
    }

    /// Inject the widget container into the host page.
    pub fn mount(&self) {
        self.host.ensure_container(WIDGET_CONTAINER_ID);
    }

    /// Fetch activation configuration and bind matching host elements.
    ///
    /// Re-invocable at any time (the host-page re-entry hook): a failed
    /// fetch is logged and leaves existing bindings untouched, so clicking
    /// an unconfigured element stays a no-op rather than a crash.
    pub async fn load_configuration(&self) -> bool {
        let settings = match self.settings.fetch(&self.host.page_path()).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "failed to load widget configuration");
                return false;
            }
        };
        self.apply_settings(settings);
        true
    }

    /// Bind every configured activation key that has a matching element.
    pub fn apply_settings(&self, settings: WidgetSettings) -> usize {
        let mut bound = 0;
        if let Ok(mut bindings) = self.bindings.lock() {
            for (key, agent) in settings.agents {
                if self.host.has_element(&key) {
                    tracing::info!(key = %key, character = %agent.character, "activation point bound");
                    bindings.insert(key, agent);
                    bound += 1;
                } else {
                    tracing::warn!(key = %key, "no matching element on host page; skipping");
                }
            }
        }
        self.bridge.initialize(&settings.public_key);
        bound
    }

    /// Activation keys currently bound to host elements.
    pub fn bound_keys(&self) -> Vec<String> {
        self.bindings
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Open the overlay for the given activation key and start a session.
    ///
    /// Unbound keys are a no-op: no handler was ever attached for them.
    pub async fn activate(&self, key: &str) -> bool {
        let agent = match self.bindings.lock().ok().and_then(|b| b.get(key).cloned()) {
            Some(agent) => agent,
            None => {
                tracing::debug!(key, "activation for unbound key ignored");
                return false;
            }
        };

        if let Ok(mut overlay) = self.overlay.lock() {
            overlay.visible = true;
            overlay.booking_visible = false;
            overlay.character_name = agent.character.clone();
            overlay.character_image = agent.character_image.clone();
            overlay.booking_url = agent.booking_url.clone();
        }
        if let Ok(mut fields) = self.fields.lock() {
            fields.configure(agent.user_collection_fields.iter().cloned());
        }

        self.bridge
            .start(&agent.assistant_payload(), &agent.character)
            .await;
        true
    }

    /// Close the overlay, tear the session down, reset per-call state.
    pub async fn deactivate(&self) {
        if let Ok(mut overlay) = self.overlay.lock() {
            overlay.visible = false;
            overlay.booking_visible = false;
        }
        self.bridge.stop().await;
        {
            // Stop produces no further lines; anything still queued was
            // stamped with the old generation and goes stale here, before
            // the viewport is cleared.
            let _gate = self.render_gate.lock();
            self.call_gen.fetch_add(1, Ordering::SeqCst);
            self.typewriter.cancel_all();
        }
        if let Ok(mut fields) = self.fields.lock() {
            fields.clear();
        }
    }

    /// Tear everything down, including the transcript line pump.
    pub async fn unmount(&self) {
        self.deactivate().await;
        if let Ok(mut pump) = self.line_pump.lock()
            && let Some(task) = pump.take()
        {
            task.abort();
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.bridge.state()
    }

    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }

    pub fn overlay(&self) -> OverlayUi {
        self.overlay.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Shared handle to the contact-field collector backing the overlay form.
    pub fn fields(&self) -> Arc<Mutex<FieldCollector>> {
        Arc::clone(&self.fields)
    }

    pub fn typewriter(&self) -> &TranscriptTypewriter {
        &self.typewriter
    }

    /// Drag the floating overlay; the clamped position is persisted so it
    /// survives page reloads.
    pub fn drag_overlay(&self, x: f32, y: f32) -> Option<Position> {
        let Ok(mut position) = self.position.lock() else {
            return None;
        };
        let dropped = position.drag_to(x, y);
        if let Err(e) = position.persist() {
            tracing::debug!(error = %e, "failed to persist overlay position");
        }
        Some(dropped)
    }

    pub fn overlay_position(&self) -> Option<Position> {
        self.position.lock().map(|p| p.position()).ok()
    }
}

/// Fixed dispatch table for mid-call function names.
fn dispatch_function_call(overlay: &Arc<Mutex<OverlayUi>>, name: &str) {
    match name {
        FN_MEETING => {
            if let Ok(mut overlay) = overlay.lock() {
                overlay.booking_visible = true;
            }
        }
        other => {
            tracing::debug!(name = other, "unknown function call ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::ViewportBounds;
    use crate::protocol::{Role, TransportEvent};
    use crate::report::LoggingReporter;
    use crate::settings::AgentSettings;
    use crate::transport::{ScriptedStep, ScriptedTransport};
    use crate::typewriter::{TranscriptView, Viewport};
    use std::time::Duration;

    fn agent(character: &str, fields: &[&str]) -> AgentSettings {
        let mut assistant = serde_json::Map::new();
        assistant.insert("voice_id".to_string(), serde_json::json!("en-GB-1"));
        AgentSettings {
            character: character.to_string(),
            character_image: Some("https://cdn.example/ava.png".to_string()),
            booking_url: Some("https://cal.example/ava".to_string()),
            user_collection_fields: fields.iter().map(|f| f.to_string()).collect(),
            assistant,
        }
    }

    fn settings_for(key: &str, agent_settings: AgentSettings) -> WidgetSettings {
        WidgetSettings {
            agents: HashMap::from([(key.to_string(), agent_settings)]),
            public_key: "pk_test".to_string(),
        }
    }

    fn floating() -> DraggableOverlay {
        DraggableOverlay::with_store(
            ViewportBounds {
                width: 1280.0,
                height: 800.0,
            },
            320.0,
            480.0,
            None,
        )
    }

    struct Fixture {
        controller: WidgetController,
        transport: Arc<ScriptedTransport>,
        view: Arc<TranscriptView>,
    }

    fn fixture(host: StaticHostPage, script: Vec<ScriptedStep>) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new(script));
        let factory_transport = Arc::clone(&transport);
        let factory: TransportFactory = Arc::new(move |_key| {
            Arc::clone(&factory_transport) as Arc<dyn crate::transport::VoiceTransport>
        });
        let view = Arc::new(TranscriptView::new());
        let typewriter = TranscriptTypewriter::new(Arc::clone(&view) as Arc<dyn Viewport>)
            .with_interval(Duration::from_millis(1));
        let controller = WidgetController::new(
            Arc::new(host),
            SettingsClient::new("http://localhost:0"),
            factory,
            Arc::new(LoggingReporter),
            typewriter,
            floating(),
        );
        Fixture {
            controller,
            transport,
            view,
        }
    }

    #[tokio::test]
    async fn test_scenario_click_to_active() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(
            host,
            vec![ScriptedStep::new(10, TransportEvent::speech_started())],
        );

        let bound = f.controller.apply_settings(settings_for(
            "agent-button",
            agent("Ava", &["email_address"]),
        ));
        assert_eq!(bound, 1);

        assert!(f.controller.activate("agent-button").await);
        let overlay = f.controller.overlay();
        assert!(overlay.visible);
        assert_eq!(overlay.character_name, "Ava");
        assert_eq!(f.controller.session_state(), SessionState::Starting);
        assert!(f.controller.bridge().is_loading());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(f.controller.session_state(), SessionState::Active);
        assert!(!f.controller.bridge().is_loading());
    }

    #[tokio::test]
    async fn test_scenario_tool_call_opens_booking_overlay() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(
            host,
            vec![
                ScriptedStep::new(0, TransportEvent::speech_started()),
                ScriptedStep::new(10, TransportEvent::tool_calls(["meeting"])),
            ],
        );
        f.controller
            .apply_settings(settings_for("agent-button", agent("Ava", &[])));

        f.controller.activate("agent-button").await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let overlay = f.controller.overlay();
        assert!(overlay.booking_visible);
        assert_eq!(overlay.booking_url.as_deref(), Some("https://cal.example/ava"));
    }

    #[tokio::test]
    async fn test_scenario_close_while_starting() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        // Speech never arrives before the user closes the overlay.
        let f = fixture(
            host,
            vec![ScriptedStep::new(60_000, TransportEvent::speech_started())],
        );
        f.controller
            .apply_settings(settings_for("agent-button", agent("Ava", &[])));

        f.controller.activate("agent-button").await;
        assert_eq!(f.controller.session_state(), SessionState::Starting);

        f.controller.deactivate().await;

        assert_eq!(f.transport.stop_count(), 1);
        assert_eq!(f.controller.session_state(), SessionState::Idle);
        assert!(f.controller.bridge().transcript().is_empty());
        assert!(!f.controller.overlay().visible);
    }

    #[tokio::test]
    async fn test_transcript_lines_reach_viewport_in_order() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(
            host,
            vec![
                ScriptedStep::new(0, TransportEvent::speech_started()),
                ScriptedStep::new(5, TransportEvent::final_transcript(Role::Assistant, "hi")),
                ScriptedStep::new(5, TransportEvent::partial_transcript(Role::User, "ok")),
                ScriptedStep::new(5, TransportEvent::final_transcript(Role::User, "okay")),
            ],
        );
        f.controller
            .apply_settings(settings_for("agent-button", agent("Ava", &[])));

        f.controller.activate("agent-button").await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let lines = f.view.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "hi");
        assert_eq!(lines[1].text, "okay");
    }

    #[tokio::test]
    async fn test_line_from_ended_call_never_renders() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(
            host,
            vec![ScriptedStep::new(0, TransportEvent::speech_started())],
        );
        f.controller
            .apply_settings(settings_for("agent-button", agent("Ava", &[])));
        f.controller.activate("agent-button").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Deliver a finalized line and tear down before its reveal could
        // run, so the line may still be queued when the viewport clears.
        f.controller
            .bridge()
            .handle_event(TransportEvent::final_transcript(Role::Assistant, "stale line"));
        f.controller.deactivate().await;

        assert!(f.view.lines().is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            f.view.lines().is_empty(),
            "line from ended call rendered: {:?}",
            f.view.lines()
        );

        // The next call's lines still render.
        f.controller.activate("agent-button").await;
        f.controller
            .bridge()
            .handle_event(TransportEvent::final_transcript(Role::Assistant, "fresh line"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let lines = f.view.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "fresh line");
    }

    #[tokio::test]
    async fn test_unmatched_keys_skipped_and_unbound_activation_is_noop() {
        let host = StaticHostPage::new("https://customer.example", "/", ["present"]);
        let f = fixture(host, Vec::new());

        let mut agents = HashMap::new();
        agents.insert("present".to_string(), agent("Ava", &[]));
        agents.insert("missing".to_string(), agent("Bryn", &[]));
        let bound = f.controller.apply_settings(WidgetSettings {
            agents,
            public_key: "pk_test".to_string(),
        });

        assert_eq!(bound, 1);
        assert_eq!(f.controller.bound_keys(), vec!["present".to_string()]);

        assert!(!f.controller.activate("missing").await);
        assert!(!f.controller.overlay().visible);
        assert_eq!(f.controller.session_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_existing_bindings() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(host, Vec::new());
        f.controller
            .apply_settings(settings_for("agent-button", agent("Ava", &[])));

        // The fixture's settings client points at an invalid endpoint.
        assert!(!f.controller.load_configuration().await);
        assert_eq!(f.controller.bound_keys(), vec!["agent-button".to_string()]);
    }

    #[tokio::test]
    async fn test_deactivate_clears_fields_and_viewport() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(
            host,
            vec![
                ScriptedStep::new(0, TransportEvent::speech_started()),
                ScriptedStep::new(5, TransportEvent::final_transcript(Role::Assistant, "hello")),
            ],
        );
        f.controller.apply_settings(settings_for(
            "agent-button",
            agent("Ava", &["email_address"]),
        ));

        f.controller.activate("agent-button").await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        if let Ok(mut fields) = f.controller.fields().lock() {
            fields.set_value("email_address", "rhys@example.com");
        }

        f.controller.deactivate().await;

        assert!(f.view.lines().is_empty());
        let snapshot = f.controller.fields().lock().unwrap().snapshot();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_mount_injects_container() {
        let host = Arc::new(StaticHostPage::new("https://customer.example", "/", [] as [&str; 0]));
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let factory: TransportFactory = Arc::new(move |_key| {
            Arc::clone(&transport) as Arc<dyn crate::transport::VoiceTransport>
        });
        let view = Arc::new(TranscriptView::new());
        let controller = WidgetController::new(
            Arc::clone(&host) as Arc<dyn HostPage>,
            SettingsClient::new("http://localhost:0"),
            factory,
            Arc::new(LoggingReporter),
            TranscriptTypewriter::new(view as Arc<dyn Viewport>),
            floating(),
        );

        controller.mount();
        controller.mount();
        assert_eq!(host.injected_containers(), vec![WIDGET_CONTAINER_ID.to_string()]);
    }

    #[tokio::test]
    async fn test_drag_overlay_is_clamped() {
        let host = StaticHostPage::new("https://customer.example", "/", ["agent-button"]);
        let f = fixture(host, Vec::new());

        let dropped = f.controller.drag_overlay(-100.0, 5000.0).unwrap();
        assert_eq!(dropped, Position { x: 0.0, y: 320.0 });
        assert_eq!(f.controller.overlay_position(), Some(dropped));
    }
}
