use crate::geo::{LngLat, Viewport};
use crate::render::{Banner, MapSurface, MarkerId, MarkerKind, MarkerSpec, PopupContent};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::Write;

/// Keeps the current markers and banners and prints a frame after each
/// draw pass.
pub struct TerminalSurface<W: Write> {
    out: W,
    markers: BTreeMap<MarkerId, MarkerSpec>,
    banners: BTreeMap<Banner, String>,
    camera: Option<Viewport>,
    next_id: u64,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            markers: BTreeMap::new(),
            banners: BTreeMap::new(),
            camera: None,
            next_id: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            warn!("Could not write map frame: {}", e);
        }
    }

    /// Renders the current markers and banners as text.
    pub fn frame(&self) -> String {
        let mut lines = Vec::new();
        if let Some(camera) = &self.camera {
            lines.push(format!(
                "== map @ {} z{:.1} ==",
                format_position(camera.center),
                camera.zoom
            ));
        } else {
            lines.push("== map ==".to_string());
        }
        for text in self.banners.values() {
            lines.push(format!("! {}", text));
        }
        for spec in self.markers.values() {
            lines.push(marker_line(spec));
        }
        lines.join("\n") + "\n"
    }
}

fn format_position(p: LngLat) -> String {
    format!("{:.4},{:.4}", p.lat, p.lng)
}

fn marker_line(spec: &MarkerSpec) -> String {
    let position = format_position(spec.position);
    let title = spec.popup.as_ref().map(|p| p.title.as_str()).unwrap_or("");
    match &spec.kind {
        MarkerKind::Badge { count, .. } => {
            let latest = spec
                .popup
                .as_ref()
                .map(|p| p.time_label.as_str())
                .unwrap_or("");
            format!("[{:>3}] {}  {} ({})", count, position, title, latest)
        }
        MarkerKind::Single { sighting, opacity, age_label } => {
            let description = spec
                .popup
                .as_ref()
                .and_then(|p| p.description.as_deref())
                .unwrap_or("-");
            format!(
                "  *   {}  {:>3} {:.2} {} {}",
                position, age_label, opacity, sighting, description
            )
        }
        MarkerKind::UserLocation => format!("  @   {}  {}", position, title),
    }
}

impl<W: Write> MapSurface for TerminalSurface<W> {
    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerId {
        self.next_id += 1;
        let id = MarkerId(self.next_id);
        self.markers.insert(id, spec);
        id
    }

    fn remove_marker(&mut self, id: MarkerId) {
        self.markers.remove(&id);
    }

    fn set_popup(&mut self, id: MarkerId, popup: PopupContent) {
        let Some(marker) = self.markers.get_mut(&id) else {
            debug!("Popup for unknown marker {:?}", id);
            return;
        };
        let line = format!(
            "> {}: {}\n",
            popup.title,
            popup.description.as_deref().unwrap_or("-")
        );
        marker.popup = Some(popup);
        self.emit(&line);
    }

    fn show_banner(&mut self, banner: Banner, text: &str) {
        self.banners.insert(banner, text.to_string());
    }

    fn hide_banner(&mut self, banner: Banner) {
        self.banners.remove(&banner);
    }

    fn move_camera(&mut self, viewport: Viewport) {
        self.camera = Some(viewport);
    }

    fn flush(&mut self) {
        let frame = self.frame();
        self.emit(&frame);
    }
}
