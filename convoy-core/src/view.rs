use std::collections::BTreeMap;

use crate::convoy::{ConvoyEvent, ConvoySnapshot, PositionRecord};
use crate::types::{ConvoyId, Coordinate, UserId};

pub const SELF_LABEL: &str = "Me";
pub const DESTINATION_LABEL: &str = "Destination";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Me,
    Member,
    Destination,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub label: String,
    pub coordinate: Coordinate,
    pub user_id: Option<UserId>,
}

/// Client-side picture of one convoy, folded from a snapshot and the events
/// that follow it. Entries are keyed by user id, so echoes of our own
/// updates simply overwrite.
#[derive(Debug, Clone)]
pub struct ConvoyView {
    convoy_id: ConvoyId,
    me: UserId,
    members: BTreeMap<UserId, String>,
    positions: BTreeMap<UserId, PositionRecord>,
    destination: Option<Coordinate>,
    closed: bool,
}

impl ConvoyView {
    pub fn new(me: UserId, snapshot: ConvoySnapshot) -> Self {
        let mut view = Self {
            convoy_id: snapshot.convoy_id.clone(),
            me,
            members: BTreeMap::new(),
            positions: BTreeMap::new(),
            destination: None,
            closed: false,
        };
        view.reset(snapshot);
        view
    }

    fn reset(&mut self, snapshot: ConvoySnapshot) {
        self.convoy_id = snapshot.convoy_id;
        self.members = snapshot
            .members
            .into_iter()
            .map(|m| (m.user_id, m.display_name))
            .collect();
        self.positions = snapshot
            .positions
            .into_iter()
            .map(|r| (r.user_id.clone(), r))
            .collect();
        self.destination = snapshot.destination;
        self.closed = false;
    }

    pub fn apply(&mut self, event: ConvoyEvent) {
        match event {
            ConvoyEvent::Snapshot { snapshot } => self.reset(snapshot),
            ConvoyEvent::MemberJoined {
                user_id,
                display_name,
            } => {
                self.members.insert(user_id, display_name);
            }
            ConvoyEvent::PositionUpdated { user_id, record } => {
                self.members
                    .entry(user_id.clone())
                    .or_insert_with(|| record.display_name.clone());
                self.positions.insert(user_id, record);
            }
            ConvoyEvent::MemberLeft { user_id, .. } => {
                self.members.remove(&user_id);
                self.positions.remove(&user_id);
            }
            ConvoyEvent::DestinationChanged { coordinate } => {
                self.destination = Some(coordinate);
            }
            ConvoyEvent::ConvoyClosed => {
                self.members.clear();
                self.positions.clear();
                self.destination = None;
                self.closed = true;
            }
        }
    }

    pub fn convoy_id(&self) -> &ConvoyId {
        &self.convoy_id
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn destination(&self) -> Option<Coordinate> {
        self.destination
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn position(&self, user_id: &UserId) -> Option<&PositionRecord> {
        self.positions.get(user_id)
    }

    /// Label shown for a member: "Me" for ourselves, otherwise the display
    /// name, falling back to the user id
    pub fn label_for(&self, user_id: &UserId) -> String {
        if user_id == &self.me {
            return SELF_LABEL.to_string();
        }
        match self.members.get(user_id) {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => user_id.to_string(),
        }
    }

    /// One marker per positioned member (self first), then the destination
    pub fn markers(&self) -> Vec<Marker> {
        let mut markers = Vec::with_capacity(self.positions.len() + 1);

        if let Some(record) = self.positions.get(&self.me) {
            markers.push(Marker {
                kind: MarkerKind::Me,
                label: SELF_LABEL.to_string(),
                coordinate: record.coordinate(),
                user_id: Some(self.me.clone()),
            });
        }

        markers.extend(
            self.positions
                .iter()
                .filter(|(user_id, _)| *user_id != &self.me)
                .map(|(user_id, record)| Marker {
                    kind: MarkerKind::Member,
                    label: self.label_for(user_id),
                    coordinate: record.coordinate(),
                    user_id: Some(user_id.clone()),
                }),
        );

        if let Some(coordinate) = self.destination {
            markers.push(Marker {
                kind: MarkerKind::Destination,
                label: DESTINATION_LABEL.to_string(),
                coordinate,
                user_id: None,
            });
        }

        markers
    }
}

/// Draws a convoy view. Renderers only read the view.
pub trait MapRenderer {
    type Output;

    fn render(&self, view: &ConvoyView) -> Self::Output;
}

/// Text member list, one line per member plus the destination
#[derive(Debug, Clone, Copy, Default)]
pub struct SidePanelRenderer;

fn format_coordinate(coordinate: &Coordinate) -> String {
    format!("{:.4}, {:.4}", coordinate.latitude, coordinate.longitude)
}

impl MapRenderer for SidePanelRenderer {
    type Output = Vec<String>;

    fn render(&self, view: &ConvoyView) -> Vec<String> {
        let mut lines: Vec<String> = view
            .members
            .keys()
            .map(|user_id| {
                let label = view.label_for(user_id);
                match view.position(user_id) {
                    Some(record) => format!("{label} @ {}", format_coordinate(&record.coordinate())),
                    None => format!("{label} (no position yet)"),
                }
            })
            .collect();

        if let Some(destination) = view.destination() {
            lines.push(format!(
                "{DESTINATION_LABEL} @ {}",
                format_coordinate(&destination)
            ));
        }

        lines
    }
}
