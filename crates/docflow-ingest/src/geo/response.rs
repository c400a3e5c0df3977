//! Streaming scan of Google Geocoding XML responses
//!
//! Only the first coordinate pair matters:
//!
//! ```xml
//! <GeocodeResponse>
//!   <status>OK</status>
//!   <result>
//!     <geometry>
//!       <location>
//!         <lat>42.3780421</lat>
//!         <lng>12.2785659</lng>
//!       </location>
//!       <viewport>...</viewport>
//!     </geometry>
//!   </result>
//! </GeocodeResponse>
//! ```
//!
//! The document is read event by event with `quick-xml`; nothing is
//! materialised beyond the two coordinate strings and the status.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::Coordinates;
use crate::error::GeoErrorKind;

const LATITUDE_TAG: &[u8] = b"lat";
const LONGITUDE_TAG: &[u8] = b"lng";
const STATUS_TAG: &[u8] = b"status";

/// What a response said, as far as enrichment cares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeocodeResponse {
    /// Top-level `<status>` text, when present
    pub status: Option<String>,
    /// First `lat`/`lng` pair found under a common parent
    pub coordinates: Option<Coordinates>,
}

/// Position in the search for the first coordinate pair
///
/// `depth` is the nesting level of the element being tracked, so the
/// longitude must be a sibling of the latitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    InLatitude { depth: usize },
    AwaitingLongitude { depth: usize },
    InLongitude { depth: usize },
    Done,
}

struct Scanner {
    state: ScanState,
    depth: usize,
    latitude: String,
    longitude: String,
    status: Option<String>,
    in_status: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            depth: 0,
            latitude: String::new(),
            longitude: String::new(),
            status: None,
            in_status: false,
        }
    }

    fn start(&mut self, name: &[u8]) {
        self.depth += 1;
        let depth = self.depth;

        // <status> is a direct child of the document element
        if depth == 2 && name == STATUS_TAG && self.status.is_none() {
            self.in_status = true;
            self.status = Some(String::new());
        }

        self.state = match self.state {
            ScanState::Idle if name == LATITUDE_TAG => {
                self.latitude.clear();
                ScanState::InLatitude { depth }
            },
            ScanState::AwaitingLongitude { depth: d } if d == depth && name == LATITUDE_TAG => {
                self.latitude.clear();
                ScanState::InLatitude { depth }
            },
            ScanState::AwaitingLongitude { depth: d } if d == depth && name == LONGITUDE_TAG => {
                self.longitude.clear();
                ScanState::InLongitude { depth }
            },
            other => other,
        };
    }

    fn text(&mut self, text: &str) {
        let text = text.trim();
        if self.in_status {
            if let Some(status) = self.status.as_mut() {
                status.push_str(text);
            }
        }
        match self.state {
            ScanState::InLatitude { .. } => self.latitude.push_str(text),
            ScanState::InLongitude { .. } => self.longitude.push_str(text),
            _ => {},
        }
    }

    fn end(&mut self) {
        let depth = self.depth;
        self.in_status = false;

        self.state = match self.state {
            ScanState::InLatitude { depth: d } if d == depth => ScanState::AwaitingLongitude { depth },
            ScanState::InLongitude { depth: d } if d == depth => ScanState::Done,
            // the parent closed without a longitude
            ScanState::AwaitingLongitude { depth: d } if depth < d => ScanState::Idle,
            other => other,
        };

        self.depth = self.depth.saturating_sub(1);
    }

    fn finish(self) -> GeocodeResponse {
        let coordinates = match self.state {
            ScanState::Done if !self.latitude.is_empty() && !self.longitude.is_empty() => {
                Some(Coordinates::new(self.latitude, self.longitude))
            },
            _ => None,
        };

        GeocodeResponse {
            status: self.status.filter(|s| !s.is_empty()),
            coordinates,
        }
    }
}

/// Scan a geocoding response body
///
/// Fails only when the body is not well-formed XML.
pub fn parse_geocode_response(body: &str) -> Result<GeocodeResponse, GeoErrorKind> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut scanner = Scanner::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => scanner.start(e.local_name().as_ref()),
            Ok(Event::Empty(e)) => {
                scanner.start(e.local_name().as_ref());
                scanner.end();
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| malformed(&reader, e))?;
                scanner.text(&text);
            },
            Ok(Event::CData(c)) => scanner.text(&String::from_utf8_lossy(&c)),
            Ok(Event::End(_)) => scanner.end(),
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(malformed(&reader, e)),
        }
    }

    Ok(scanner.finish())
}

fn malformed(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> GeoErrorKind {
    GeoErrorKind::MalformedResponse(format!(
        "XML error at position {}: {}",
        reader.buffer_position(),
        err
    ))
}
