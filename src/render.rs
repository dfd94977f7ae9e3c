//! Turns clusters into markers, popups and banners on a `MapSurface`.
//!
//! The renderer never touches the store. Every pass removes the markers of
//! the previous pass and draws the new set; nothing is diffed. Overlays (user
//! location, offline and location banners) survive redraws.

use crate::cluster::Cluster;
use crate::filter::TimeWindow;
use crate::geo::{LngLat, Viewport};
use crate::i18n::Locale;
use crate::record::{Sighting, SightingId};
use crate::store::LoadState;
use crate::util::escape_html;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::HashMap;

/// Very old but still relevant markers never fade below this.
pub const MIN_OPACITY: f64 = 0.35;
/// Fade horizon when the window has no cutoff.
pub const FADE_HORIZON_MINUTES: i64 = 120;
/// Screen padding kept around a cluster's extent when zooming to it.
pub const CLUSTER_FIT_PADDING: f64 = 40.0;
/// Zoom used when flying to the user's position.
pub const USER_ZOOM: f64 = 13.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    Uninitialized,
    Loading,
    Ready,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Banner {
    LoadFailed,
    NoSightings,
    NoSightingsInWindow,
    Offline,
    LocationDenied,
}

impl Banner {
    pub fn text(&self, locale: Locale) -> &'static str {
        let m = locale.messages();
        match self {
            Banner::LoadFailed => m.load_failed,
            Banner::NoSightings => m.no_sightings,
            Banner::NoSightingsInWindow => m.no_sightings_filter,
            Banner::Offline => m.offline,
            Banner::LocationDenied => m.location_denied,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PopupContent {
    pub title: String,
    pub description: Option<String>,
    pub time_label: String,
    pub image_url: Option<String>,
    pub footer: Option<String>,
}

impl PopupContent {
    pub fn to_html(&self) -> String {
        let mut html = format!(
            "<div class=\"sighting-popup\"><strong>{}</strong>",
            escape_html(&self.title)
        );
        if let Some(desc) = &self.description {
            html.push_str(&format!("<p>{}</p>", escape_html(desc)));
        }
        if let Some(url) = &self.image_url {
            html.push_str(&format!("<img src=\"{}\" alt=\"\"/>", escape_html(url)));
        }
        html.push_str(&format!("<p class=\"time\">{}</p>", escape_html(&self.time_label)));
        if let Some(footer) = &self.footer {
            html.push_str(&format!("<p class=\"more\">{}</p>", escape_html(footer)));
        }
        html.push_str("</div>");
        html
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerKind {
    /// Several sightings. Clicking moves the camera to `zoom_to`.
    Badge { count: usize, zoom_to: Viewport },
    Single {
        sighting: SightingId,
        opacity: f64,
        age_label: String,
    },
    UserLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub position: LngLat,
    pub kind: MarkerKind,
    pub popup: Option<PopupContent>,
}

/// The map backend the renderer draws on.
pub trait MapSurface {
    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerId;
    fn remove_marker(&mut self, id: MarkerId);
    fn set_popup(&mut self, id: MarkerId, popup: PopupContent);
    fn show_banner(&mut self, banner: Banner, text: &str);
    fn hide_banner(&mut self, banner: Banner);
    fn move_camera(&mut self, viewport: Viewport);

    /// Called once a draw pass is complete.
    fn flush(&mut self) {}
}

/// Per-pass inputs besides the clusters themselves.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub now: DateTime<Utc>,
    pub window: TimeWindow,
    pub viewport: &'a Viewport,
    pub load_state: LoadState,
    pub total_sightings: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub clusters: usize,
    pub badges: usize,
    pub singles: usize,
    pub visible_sightings: usize,
}

/// Identifies the popup and language a translation was requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTicket {
    pub sighting: SightingId,
    pub locale: Locale,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub ticket: TranslationTicket,
    pub text: String,
}

struct OpenPopup {
    sighting: SightingId,
    generation: u64,
    translated: Option<(Locale, String)>,
}

struct DrawnSingle {
    marker: MarkerId,
    popup: PopupContent,
}

/// Opacity for a single marker: fades linearly with age over the window
/// (or `FADE_HORIZON_MINUTES`) and is floored at `MIN_OPACITY`.
pub fn marker_opacity(age: Duration, window: TimeWindow) -> f64 {
    let horizon = window
        .cutoff()
        .unwrap_or_else(|| Duration::minutes(FADE_HORIZON_MINUTES));
    let fraction = (age.num_milliseconds() as f64 / horizon.num_milliseconds() as f64).clamp(0.0, 1.0);
    (1.0 - fraction * (1.0 - MIN_OPACITY)).max(MIN_OPACITY)
}

pub struct MapRenderer<M> {
    surface: M,
    state: MapState,
    markers: Vec<MarkerId>,
    singles: HashMap<SightingId, DrawnSingle>,
    user_marker: Option<MarkerId>,
    banners: HashMap<Banner, &'static str>,
    locale: Locale,
    popup: Option<OpenPopup>,
    generation: u64,
}

impl<M: MapSurface> MapRenderer<M> {
    pub fn new(surface: M, locale: Locale) -> Self {
        Self {
            surface,
            state: MapState::Uninitialized,
            markers: Vec::new(),
            singles: HashMap::new(),
            user_marker: None,
            banners: HashMap::new(),
            locale,
            popup: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> MapState {
        self.state
    }

    pub fn surface(&self) -> &M {
        &self.surface
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    fn transition(&mut self, from: MapState, to: MapState) -> bool {
        if self.state != from {
            warn!("Ignoring map transition {:?} -> {:?} from {:?}", from, to, self.state);
            return false;
        }
        debug!("Map {:?} -> {:?}", from, to);
        self.state = to;
        true
    }

    /// Tiles and style are being fetched.
    pub fn begin_loading(&mut self) -> bool {
        self.transition(MapState::Uninitialized, MapState::Loading)
    }

    pub fn mark_ready(&mut self) -> bool {
        self.transition(MapState::Loading, MapState::Ready)
    }

    fn clear_markers(&mut self) {
        for id in self.markers.drain(..) {
            self.surface.remove_marker(id);
        }
        self.singles.clear();
    }

    fn single_popup(&self, sighting: &Sighting, now: DateTime<Utc>) -> PopupContent {
        let age = self.locale.relative_age(now - sighting.created_at);
        PopupContent {
            title: self.locale.messages().ice_sighting.to_string(),
            description: sighting.description.clone(),
            time_label: age,
            image_url: sighting.image_ref.clone(),
            footer: None,
        }
    }

    fn badge_popup(&self, cluster: &Cluster<'_>, now: DateTime<Utc>) -> PopupContent {
        let latest = cluster.latest();
        PopupContent {
            title: self.locale.ice_sightings(cluster.len()),
            description: latest.description.clone(),
            time_label: format!(
                "{}: {}",
                self.locale.messages().latest,
                self.locale.relative_age(now - latest.created_at)
            ),
            image_url: None,
            footer: Some(self.locale.more(cluster.len() - 1)),
        }
    }

    /// One full draw pass. Only draws while `Ready`.
    pub fn draw(&mut self, clusters: &[Cluster<'_>], ctx: &RenderContext<'_>) -> RenderStats {
        if self.state != MapState::Ready {
            debug!("Skipping draw while map is {:?}", self.state);
            return RenderStats::default();
        }

        self.clear_markers();
        let mut stats = RenderStats { clusters: clusters.len(), ..Default::default() };

        for cluster in clusters {
            stats.visible_sightings += cluster.len();
            if cluster.is_single() {
                let sighting = cluster.latest();
                let popup = self.single_popup(sighting, ctx.now);
                let spec = MarkerSpec {
                    position: sighting.position,
                    kind: MarkerKind::Single {
                        sighting: sighting.id.clone(),
                        opacity: marker_opacity(ctx.now - sighting.created_at, ctx.window),
                        age_label: popup.time_label.clone(),
                    },
                    popup: Some(popup.clone()),
                };
                let marker = self.surface.add_marker(spec);
                self.markers.push(marker);
                self.singles.insert(sighting.id.clone(), DrawnSingle { marker, popup });
                stats.singles += 1;
            } else {
                let zoom_to = ctx.viewport.fit_around(
                    cluster.anchor,
                    &cluster.bounds(),
                    CLUSTER_FIT_PADDING,
                    1.0,
                );
                let spec = MarkerSpec {
                    position: cluster.anchor,
                    kind: MarkerKind::Badge { count: cluster.len(), zoom_to },
                    popup: Some(self.badge_popup(cluster, ctx.now)),
                };
                let marker = self.surface.add_marker(spec);
                self.markers.push(marker);
                stats.badges += 1;
            }
        }

        self.update_empty_state(ctx, clusters.is_empty());
        self.restore_popup();
        self.surface.flush();
        stats
    }

    fn update_empty_state(&mut self, ctx: &RenderContext<'_>, nothing_visible: bool) {
        let failed = ctx.load_state == LoadState::Failed;
        let no_data = !failed && ctx.load_state == LoadState::Loaded && ctx.total_sightings == 0;
        let none_in_window = !failed && !no_data && ctx.total_sightings > 0 && nothing_visible;
        self.set_banner(Banner::LoadFailed, failed);
        self.set_banner(Banner::NoSightings, no_data);
        self.set_banner(Banner::NoSightingsInWindow, none_in_window);
    }

    /// Re-applies a finished translation to the freshly drawn marker, or
    /// closes the popup if its sighting is no longer drawn on its own.
    fn restore_popup(&mut self) {
        let Some(open) = &self.popup else {
            return;
        };
        match self.singles.get(&open.sighting) {
            Some(drawn) => {
                if let Some((locale, text)) = &open.translated {
                    if *locale == self.locale {
                        let mut popup = drawn.popup.clone();
                        popup.description = Some(text.clone());
                        self.surface.set_popup(drawn.marker, popup);
                    }
                }
            }
            None => self.close_popup(),
        }
    }

    fn translation_request(&self) -> Option<TranslationRequest> {
        let open = self.popup.as_ref()?;
        if self.locale == Locale::SOURCE {
            return None;
        }
        let drawn = self.singles.get(&open.sighting)?;
        let text = drawn.popup.description.clone()?;
        Some(TranslationRequest {
            ticket: TranslationTicket {
                sighting: open.sighting.clone(),
                locale: self.locale,
                generation: open.generation,
            },
            text,
        })
    }

    /// Opens the detail popup of a single marker. Returns the translation to
    /// start when the display locale differs from the stored language.
    pub fn open_popup(&mut self, sighting: &SightingId) -> Option<TranslationRequest> {
        if !self.singles.contains_key(sighting) {
            debug!("No single marker for {}, popup not opened", sighting);
            return None;
        }
        self.generation += 1;
        self.popup = Some(OpenPopup {
            sighting: sighting.clone(),
            generation: self.generation,
            translated: None,
        });
        self.translation_request()
    }

    pub fn close_popup(&mut self) {
        self.generation += 1;
        self.popup = None;
    }

    pub fn open_popup_id(&self) -> Option<&SightingId> {
        self.popup.as_ref().map(|p| &p.sighting)
    }

    /// Switches the display language. In-flight translations become stale;
    /// an open popup gets a new translation request when needed.
    pub fn set_locale(&mut self, locale: Locale) -> Option<TranslationRequest> {
        self.locale = locale;
        self.generation += 1;
        if self.state == MapState::Destroyed {
            return None;
        }
        let generation = self.generation;
        if let Some(open) = self.popup.as_mut() {
            open.generation = generation;
            open.translated = None;
            if let Some(drawn) = self.singles.get(&open.sighting) {
                self.surface.set_popup(drawn.marker, drawn.popup.clone());
            }
        }

        let shown: Vec<Banner> = self.banners.keys().copied().collect();
        for banner in shown {
            let text = banner.text(locale);
            self.banners.insert(banner, text);
            self.surface.show_banner(banner, text);
        }
        self.translation_request()
    }

    /// Applies a completed translation if it still belongs to the open popup
    /// and the current locale. Returns whether it was applied.
    pub fn apply_translation(&mut self, ticket: &TranslationTicket, text: String) -> bool {
        let Some(open) = self.popup.as_mut() else {
            return false;
        };
        if open.sighting != ticket.sighting
            || open.generation != ticket.generation
            || ticket.locale != self.locale
        {
            debug!("Discarding stale translation for {}", ticket.sighting);
            return false;
        }
        let Some(drawn) = self.singles.get(&open.sighting) else {
            return false;
        };

        let mut popup = drawn.popup.clone();
        popup.description = Some(text.clone());
        self.surface.set_popup(drawn.marker, popup);
        open.translated = Some((ticket.locale, text));
        true
    }

    pub fn set_banner(&mut self, banner: Banner, visible: bool) {
        if self.state == MapState::Destroyed {
            return;
        }
        match (visible, self.banners.contains_key(&banner)) {
            (true, false) => {
                let text = banner.text(self.locale);
                self.surface.show_banner(banner, text);
                self.banners.insert(banner, text);
            }
            (false, true) => {
                self.surface.hide_banner(banner);
                self.banners.remove(&banner);
            }
            _ => {}
        }
    }

    pub fn banner_visible(&self, banner: Banner) -> bool {
        self.banners.contains_key(&banner)
    }

    /// Places (or clears) the "you are here" marker.
    pub fn set_user_location(&mut self, position: Option<LngLat>) {
        if let Some(old) = self.user_marker.take() {
            self.surface.remove_marker(old);
        }
        if self.state == MapState::Destroyed {
            return;
        }
        if let Some(position) = position {
            let spec = MarkerSpec {
                position,
                kind: MarkerKind::UserLocation,
                popup: Some(PopupContent {
                    title: self.locale.messages().you_are_here.to_string(),
                    description: None,
                    time_label: String::new(),
                    image_url: None,
                    footer: None,
                }),
            };
            self.user_marker = Some(self.surface.add_marker(spec));
        }
    }

    pub fn move_camera(&mut self, viewport: Viewport) {
        if self.state != MapState::Destroyed {
            self.surface.move_camera(viewport);
        }
    }

    /// Releases every marker, popup and banner. Further draws are ignored.
    pub fn destroy(&mut self) -> bool {
        if self.state == MapState::Destroyed {
            return false;
        }
        self.clear_markers();
        if let Some(user) = self.user_marker.take() {
            self.surface.remove_marker(user);
        }
        let shown: Vec<Banner> = self.banners.drain().map(|(b, _)| b).collect();
        for banner in shown {
            self.surface.hide_banner(banner);
        }
        self.close_popup();
        self.state = MapState::Destroyed;
        true
    }

    pub fn into_surface(self) -> M {
        self.surface
    }
}
