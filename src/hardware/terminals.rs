//! Terminal routing between NI 660X connectors.
//!
//! Configuration may name terminals either by their physical connector
//! (`/Dev1/PFI34`, `/Dev1/RTSI0`) or by friendly counter/signal pairs
//! (`/Dev1/ctr1/gate`). [`pfi_from_friendly`] resolves the latter through the
//! fixed NI 6602 pinout. [`TerminalRouter`] applies the per-card connection
//! directives once per preparation cycle and remembers which cards are done.

use crate::error::{CtrlError, CtrlResult};
use crate::hardware::channel::{DeviceConnector, TerminalCard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Counter signals with a dedicated PFI connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterSignal {
    /// Counting source, `src`.
    Source,
    /// Gate input, `gate`.
    Gate,
    /// Output, `out`.
    Out,
    /// Auxiliary input, `aux`.
    Aux,
}

impl CounterSignal {
    /// Parse the lowercase signal suffix of a friendly name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "src" => Some(CounterSignal::Source),
            "gate" => Some(CounterSignal::Gate),
            "out" => Some(CounterSignal::Out),
            "aux" => Some(CounterSignal::Aux),
            _ => None,
        }
    }
}

/// NI 6602 pinout: (counter, [src, gate, out, aux]).
const NI6602_PFI: [(&str, [&str; 4]); 8] = [
    ("ctr0", ["PFI39", "PFI38", "PFI36", "PFI37"]),
    ("ctr1", ["PFI35", "PFI34", "PFI32", "PFI33"]),
    ("ctr2", ["PFI31", "PFI30", "PFI28", "PFI29"]),
    ("ctr3", ["PFI27", "PFI26", "PFI24", "PFI25"]),
    ("ctr4", ["PFI23", "PFI22", "PFI20", "PFI21"]),
    ("ctr5", ["PFI19", "PFI18", "PFI16", "PFI17"]),
    ("ctr6", ["PFI15", "PFI14", "PFI12", "PFI13"]),
    ("ctr7", ["PFI11", "PFI10", "PFI8", "PFI9"]),
];

/// Physical connector of `signal` for a fully qualified counter name such as
/// `/Dev1/ctr1`. The device prefix is kept: `/Dev1/ctr1` + gate → `/Dev1/PFI34`.
pub fn pfi_name(counter_name: &str, signal: CounterSignal) -> CtrlResult<String> {
    let split = counter_name.len().saturating_sub(4);
    let (prefix, counter) = match (counter_name.get(..split), counter_name.get(split..)) {
        (Some(prefix), Some(counter)) => (prefix, counter.to_ascii_lowercase()),
        _ => return Err(unknown_counter(counter_name)),
    };
    let pins = NI6602_PFI
        .iter()
        .find(|(ctr, _)| *ctr == counter)
        .map(|(_, pins)| pins)
        .ok_or_else(|| unknown_counter(counter_name))?;
    let pin = match signal {
        CounterSignal::Source => pins[0],
        CounterSignal::Gate => pins[1],
        CounterSignal::Out => pins[2],
        CounterSignal::Aux => pins[3],
    };
    Ok(format!("{prefix}{pin}"))
}

fn unknown_counter(counter_name: &str) -> CtrlError {
    CtrlError::Configuration(format!("'{counter_name}' does not name an NI6602 counter"))
}

/// Resolve a terminal given either as a connector name or as
/// `<counter>/<signal>`. RTSI and PFI names pass through unchanged.
pub fn pfi_from_friendly(terminal: &str) -> CtrlResult<String> {
    let lower = terminal.to_ascii_lowercase();
    if lower.contains("rtsi") || lower.contains("pfi") {
        return Ok(terminal.to_string());
    }
    let (counter, signal) = terminal.rsplit_once('/').ok_or_else(|| {
        CtrlError::Configuration(format!("Terminal '{terminal}' is not <counter>/<signal>"))
    })?;
    let signal = CounterSignal::parse(signal).ok_or_else(|| {
        CtrlError::Configuration(format!("Unknown counter signal in terminal '{terminal}'"))
    })?;
    pfi_name(counter, signal)
}

/// One `(source, destination, polarity)` routing directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct ConnectDirective {
    /// Terminal driving the connection.
    pub source: String,
    /// Terminal receiving the signal.
    pub destination: String,
    /// Polarity keyword passed to the card, e.g. `DoNotInvertPolarity`.
    pub polarity: String,
}

impl From<(String, String, String)> for ConnectDirective {
    fn from((source, destination, polarity): (String, String, String)) -> Self {
        Self {
            source,
            destination,
            polarity,
        }
    }
}

impl From<ConnectDirective> for (String, String, String) {
    fn from(d: ConnectDirective) -> Self {
        (d.source, d.destination, d.polarity)
    }
}

/// Routing directives keyed by card device name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectTerms(pub BTreeMap<String, Vec<ConnectDirective>>);

impl ConnectTerms {
    /// Parse the text form handed over by the host framework, e.g.
    /// `{"dev/ni660x/1": [["/Dev1/ctr0/out", "/Dev1/RTSI0", "DoNotInvertPolarity"]]}`.
    pub fn from_json(text: &str) -> CtrlResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| CtrlError::Configuration(format!("Invalid connectTerms: {e}")))
    }

    /// Whether no card has directives.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that every terminal resolves to a connector name.
    pub fn validate(&self) -> CtrlResult<()> {
        for directive in self.0.values().flatten() {
            pfi_from_friendly(&directive.source)?;
            pfi_from_friendly(&directive.destination)?;
        }
        Ok(())
    }
}

struct CardRouting {
    handle: Option<Box<dyn TerminalCard>>,
    applied: bool,
}

/// Applies connection directives at most once per card until released.
pub struct TerminalRouter {
    terms: ConnectTerms,
    cards: BTreeMap<String, CardRouting>,
}

impl TerminalRouter {
    /// Router with every card pending.
    pub fn new(terms: ConnectTerms) -> Self {
        let cards = terms
            .0
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    CardRouting {
                        handle: None,
                        applied: false,
                    },
                )
            })
            .collect();
        Self { terms, cards }
    }

    /// Whether the directives of `card` have been applied.
    pub fn is_applied(&self, card: &str) -> bool {
        self.cards.get(card).is_some_and(|c| c.applied)
    }

    /// Apply directives of every card not yet marked applied.
    ///
    /// A card is marked applied only after all its directives succeeded, so a
    /// failure leaves it pending for the next call. Returns the number of
    /// connections made.
    pub fn apply_pending(&mut self, connector: &dyn DeviceConnector) -> CtrlResult<usize> {
        let mut connections = 0;
        for (name, routing) in self.cards.iter_mut() {
            if routing.applied {
                debug!(card = %name, "terminal routing already applied");
                continue;
            }
            let directives = self.terms.0.get(name).map(Vec::as_slice).unwrap_or(&[]);
            let card = match routing.handle.take() {
                Some(handle) => handle,
                None => connector.card(name)?,
            };
            let applied = directives.iter().try_for_each(|d| {
                let source = pfi_from_friendly(&d.source)?;
                let destination = pfi_from_friendly(&d.destination)?;
                card.connect_terms(&source, &destination, &d.polarity)?;
                connections += 1;
                Ok::<(), CtrlError>(())
            });
            routing.handle = Some(card);
            applied?;
            routing.applied = true;
            info!(card = %name, directives = directives.len(), "terminal routing applied");
        }
        Ok(connections)
    }

    /// Drop card handles; the next [`apply_pending`](Self::apply_pending)
    /// binds them again and re-applies their directives.
    pub fn release_cards(&mut self) {
        for (name, routing) in self.cards.iter_mut() {
            if routing.handle.take().is_some() {
                debug!(card = %name, "released terminal routing card");
            }
            routing.applied = false;
        }
    }
}
