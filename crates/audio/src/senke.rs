//! 3D-Senken-Vertrag
//!
//! Eine [`AudioSenke`] ist das abstrakte Gegenstueck einer raeumlichen
//! Audio-Quelle im Backend (OpenAL-Quelle, Spatial-Audio-API, ...). Senken
//! werden ausschliesslich im Senken-Kontext erzeugt und benutzt, deshalb
//! ist `Send` nur fuer die Fabrik gefordert.
//!
//! [`AufzeichnungsFabrik`] erzeugt Senken, die jeden Aufruf protokollieren.
//! Sie ersetzt ein Ausgabegeraet in Tests und im Demo-Knoten.

use nahfunk_core::{PeerId, Vec3};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifiziert eine Audio-Quelle: ein entfernter Peer oder der lokale Loopback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuellenId {
    Peer(PeerId),
    Lokal,
}

impl std::fmt::Display for QuellenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "{id}"),
            Self::Lokal => f.write_str("lokal"),
        }
    }
}

pub trait AudioSenke {
    /// Reiht PCM (i16 Mono) zur Wiedergabe ein
    fn pcm_einreihen(&mut self, pcm: &[i16], abtastrate: u32);
    /// Kann die Senke weitere Segmente aufnehmen?
    fn bereit_fuer_mehr(&self) -> bool;
    fn abspielen(&mut self);
    fn stoppen(&mut self);
    fn spielt(&self) -> bool;
    fn position_setzen(&mut self, position: Vec3);
    fn richtung_setzen(&mut self, richtung: Vec3);
    fn geschwindigkeit_setzen(&mut self, geschwindigkeit: Vec3);
    /// Maximale hoerbare Distanz; `None` schaltet die Daempfung ab
    fn max_distanz_setzen(&mut self, distanz: Option<f32>);
    /// Koordinaten relativ zum Hoerer statt in Weltkoordinaten
    fn relativ_setzen(&mut self, relativ: bool);
    /// Gibt Backend-Ressourcen frei; danach wird die Senke nicht mehr benutzt
    fn freigeben(&mut self);
}

/// Erzeugt eine Senke pro Audio-Quelle (im Senken-Kontext)
pub trait SenkenFabrik: Send + 'static {
    fn erstellen(&mut self, quelle: QuellenId) -> Box<dyn AudioSenke>;
}

// ---------------------------------------------------------------------------
// Aufzeichnende Senke
// ---------------------------------------------------------------------------

/// Alles, was eine aufzeichnende Senke gesehen hat
#[derive(Debug, Clone, PartialEq)]
pub struct SenkenProtokoll {
    /// Anzahl eingereihter Segmente
    pub segmente: usize,
    pub samples: usize,
    /// Eingereiht, aber vom "Geraet" noch nicht verbraucht
    pub ausstehend: usize,
    /// Ab so vielen ausstehenden Segmenten meldet die Senke "nicht bereit"
    pub limit: usize,
    pub spielt: bool,
    pub starts: usize,
    pub position: Vec3,
    pub richtung: Vec3,
    pub geschwindigkeit: Vec3,
    pub max_distanz: Option<f32>,
    pub relativ: bool,
    pub freigegeben: bool,
}

impl SenkenProtokoll {
    fn neu(limit: usize) -> Self {
        Self {
            segmente: 0,
            samples: 0,
            ausstehend: 0,
            limit,
            spielt: false,
            starts: 0,
            position: Vec3::NULL,
            richtung: Vec3::NULL,
            geschwindigkeit: Vec3::NULL,
            max_distanz: None,
            relativ: false,
            freigegeben: false,
        }
    }

    /// Simuliert, dass das Geraet `anzahl` Segmente abgespielt hat
    pub fn verbrauchen(&mut self, anzahl: usize) {
        self.ausstehend = self.ausstehend.saturating_sub(anzahl);
        if self.ausstehend == 0 {
            // Ein leergelaufenes Backend stoppt von selbst
            self.spielt = false;
        }
    }
}

pub type GeteiltesProtokoll = Arc<Mutex<SenkenProtokoll>>;

struct AufzeichnendeSenke {
    protokoll: GeteiltesProtokoll,
}

impl AudioSenke for AufzeichnendeSenke {
    fn pcm_einreihen(&mut self, pcm: &[i16], _abtastrate: u32) {
        let mut p = self.protokoll.lock();
        p.segmente += 1;
        p.samples += pcm.len();
        p.ausstehend += 1;
    }

    fn bereit_fuer_mehr(&self) -> bool {
        let p = self.protokoll.lock();
        p.ausstehend < p.limit
    }

    fn abspielen(&mut self) {
        let mut p = self.protokoll.lock();
        p.spielt = true;
        p.starts += 1;
    }

    fn stoppen(&mut self) {
        self.protokoll.lock().spielt = false;
    }

    fn spielt(&self) -> bool {
        self.protokoll.lock().spielt
    }

    fn position_setzen(&mut self, position: Vec3) {
        self.protokoll.lock().position = position;
    }

    fn richtung_setzen(&mut self, richtung: Vec3) {
        self.protokoll.lock().richtung = richtung;
    }

    fn geschwindigkeit_setzen(&mut self, geschwindigkeit: Vec3) {
        self.protokoll.lock().geschwindigkeit = geschwindigkeit;
    }

    fn max_distanz_setzen(&mut self, distanz: Option<f32>) {
        self.protokoll.lock().max_distanz = distanz;
    }

    fn relativ_setzen(&mut self, relativ: bool) {
        self.protokoll.lock().relativ = relativ;
    }

    fn freigeben(&mut self) {
        let mut p = self.protokoll.lock();
        p.spielt = false;
        p.ausstehend = 0;
        p.freigegeben = true;
    }
}

/// Fabrik fuer aufzeichnende Senken; Klone teilen die Protokolle
#[derive(Clone, Default)]
pub struct AufzeichnungsFabrik {
    protokolle: Arc<Mutex<HashMap<QuellenId, Vec<GeteiltesProtokoll>>>>,
    limit: Option<usize>,
}

impl AufzeichnungsFabrik {
    /// Senken ohne Limit; sie sind immer bereit
    pub fn neu() -> Self {
        Self::default()
    }

    /// Senken, die ab `limit` ausstehenden Segmenten nicht mehr bereit sind
    pub fn mit_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Alle bisher fuer eine Quelle erzeugten Senken, aelteste zuerst
    pub fn protokolle(&self, quelle: QuellenId) -> Vec<GeteiltesProtokoll> {
        self.protokolle
            .lock()
            .get(&quelle)
            .cloned()
            .unwrap_or_default()
    }

    /// Schnappschuss der juengsten Senke einer Quelle
    pub fn aktuell(&self, quelle: QuellenId) -> Option<SenkenProtokoll> {
        self.protokolle
            .lock()
            .get(&quelle)
            .and_then(|v| v.last())
            .map(|p| p.lock().clone())
    }

    pub fn anzahl_senken(&self) -> usize {
        self.protokolle.lock().values().map(Vec::len).sum()
    }
}

impl SenkenFabrik for AufzeichnungsFabrik {
    fn erstellen(&mut self, quelle: QuellenId) -> Box<dyn AudioSenke> {
        let protokoll = Arc::new(Mutex::new(SenkenProtokoll::neu(
            self.limit.unwrap_or(usize::MAX),
        )));
        self.protokolle
            .lock()
            .entry(quelle)
            .or_default()
            .push(Arc::clone(&protokoll));
        tracing::trace!(%quelle, "Aufzeichnende Senke erstellt");
        Box::new(AufzeichnendeSenke { protokoll })
    }
}

impl std::fmt::Debug for AufzeichnungsFabrik {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AufzeichnungsFabrik")
            .field("senken", &self.anzahl_senken())
            .field("limit", &self.limit)
            .finish()
    }
}
