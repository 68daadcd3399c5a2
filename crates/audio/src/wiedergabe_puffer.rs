//! Wiedergabepuffer pro Peer
//!
//! Kleine, feste Kapazitaet (Standard 4 Segmente), sortiert nach
//! Sequenznummer. Begrenzte Latenz geht vor Vollstaendigkeit:
//!
//! - Segmente aelter als das aelteste gepufferte oder bereits entnommene
//!   werden verworfen, ebenso Duplikate.
//! - Ist der Puffer voll, wird das aelteste Segment verdraengt; Einfuegen
//!   blockiert nie.
//! - Leerer Puffer bedeutet Leerlauf. Es wird keine Stille aufgefuellt.
//!
//! Nicht thread-safe; lebt ausschliesslich im Senken-Kontext.

use std::collections::BTreeMap;

/// Standard-Kapazitaet in Segmenten (je 20 ms)
pub const STANDARD_KAPAZITAET: usize = 4;

/// Ein dekodiertes PCM-Segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence: u32,
    pub pcm: Vec<i16>,
}

/// Ergebnis von [`WiedergabePuffer::einfuegen`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Einfuegung {
    Eingereiht,
    /// Eingereiht; das aelteste Segment (Sequenz) musste weichen
    Verdraengt(u32),
    ZuSpaet,
    Duplikat,
}

impl Einfuegung {
    pub fn angenommen(self) -> bool {
        matches!(self, Self::Eingereiht | Self::Verdraengt(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PufferStatistik {
    pub eingereiht: u64,
    pub entnommen: u64,
    pub zu_spaet: u64,
    pub duplikate: u64,
    pub verdraengt: u64,
}

#[derive(Debug)]
pub struct WiedergabePuffer {
    kapazitaet: usize,
    segmente: BTreeMap<u32, Vec<i16>>,
    letzte_entnommen: Option<u32>,
    statistik: PufferStatistik,
}

impl WiedergabePuffer {
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            kapazitaet: kapazitaet.max(1),
            segmente: BTreeMap::new(),
            letzte_entnommen: None,
            statistik: PufferStatistik::default(),
        }
    }

    pub fn einfuegen(&mut self, sequence: u32, pcm: Vec<i16>) -> Einfuegung {
        if self.letzte_entnommen.is_some_and(|letzte| sequence <= letzte)
            || self.aelteste().is_some_and(|aelteste| sequence < aelteste)
        {
            self.statistik.zu_spaet += 1;
            tracing::trace!(sequence, "Verspaetetes Segment verworfen");
            return Einfuegung::ZuSpaet;
        }

        if self.segmente.contains_key(&sequence) {
            self.statistik.duplikate += 1;
            return Einfuegung::Duplikat;
        }

        let mut ergebnis = Einfuegung::Eingereiht;
        if self.segmente.len() >= self.kapazitaet {
            if let Some((verdraengt, _)) = self.segmente.pop_first() {
                self.statistik.verdraengt += 1;
                tracing::debug!(sequence = verdraengt, "Puffer voll, aeltestes Segment verdraengt");
                ergebnis = Einfuegung::Verdraengt(verdraengt);
            }
        }

        self.segmente.insert(sequence, pcm);
        self.statistik.eingereiht += 1;
        ergebnis
    }

    /// Naechstes Segment in Sequenz-Reihenfolge
    pub fn entnehmen(&mut self) -> Option<Segment> {
        let (sequence, pcm) = self.segmente.pop_first()?;
        self.letzte_entnommen = Some(sequence);
        self.statistik.entnommen += 1;
        Some(Segment { sequence, pcm })
    }

    /// Verwirft alle gepufferten Segmente; gibt ihre Anzahl zurueck
    ///
    /// Vergisst auch die zuletzt entnommene Sequenz: ein neu gestarteter
    /// Sender darf wieder bei 0 beginnen.
    pub fn leeren(&mut self) -> usize {
        let anzahl = self.segmente.len();
        self.segmente.clear();
        self.letzte_entnommen = None;
        anzahl
    }

    pub fn aelteste(&self) -> Option<u32> {
        self.segmente.keys().next().copied()
    }

    pub fn fuellstand(&self) -> usize {
        self.segmente.len()
    }

    pub fn ist_leer(&self) -> bool {
        self.segmente.is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    pub fn statistik(&self) -> &PufferStatistik {
        &self.statistik
    }
}

impl Default for WiedergabePuffer {
    fn default() -> Self {
        Self::neu(STANDARD_KAPAZITAET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pcm(seq: u32) -> Vec<i16> {
        vec![seq as i16; 4]
    }

    #[test]
    fn out_of_order_wird_sortiert() {
        let mut p = WiedergabePuffer::neu(4);
        for seq in [2, 3, 5, 4] {
            assert_eq!(p.einfuegen(seq, pcm(seq)), Einfuegung::Eingereiht);
        }
        let reihenfolge: Vec<u32> = std::iter::from_fn(|| p.entnehmen())
            .map(|s| s.sequence)
            .collect();
        assert_eq!(reihenfolge, vec![2, 3, 4, 5]);
    }

    #[test]
    fn aelter_als_aeltestes_wird_verworfen() {
        let mut p = WiedergabePuffer::neu(4);
        p.einfuegen(10, pcm(10));
        assert_eq!(p.einfuegen(9, pcm(9)), Einfuegung::ZuSpaet);
        assert_eq!(p.statistik().zu_spaet, 1);
        assert_eq!(p.entnehmen().map(|s| s.sequence), Some(10));
        assert!(p.entnehmen().is_none());
    }

    #[test]
    fn bereits_entnommenes_wird_verworfen() {
        let mut p = WiedergabePuffer::neu(4);
        p.einfuegen(1, pcm(1));
        p.einfuegen(2, pcm(2));
        p.entnehmen();
        p.entnehmen();
        // Puffer leer, trotzdem zu spaet
        assert_eq!(p.einfuegen(2, pcm(2)), Einfuegung::ZuSpaet);
        assert_eq!(p.einfuegen(1, pcm(1)), Einfuegung::ZuSpaet);
        assert_eq!(p.einfuegen(3, pcm(3)), Einfuegung::Eingereiht);
    }

    #[test]
    fn duplikate_werden_verworfen() {
        let mut p = WiedergabePuffer::neu(4);
        p.einfuegen(1, pcm(1));
        assert_eq!(p.einfuegen(1, pcm(1)), Einfuegung::Duplikat);
        assert_eq!(p.fuellstand(), 1);
        assert_eq!(p.statistik().duplikate, 1);
    }

    #[test]
    fn voller_puffer_verdraengt_genau_das_aelteste() {
        let mut p = WiedergabePuffer::neu(4);
        for seq in 0..4 {
            p.einfuegen(seq, pcm(seq));
        }
        assert_eq!(p.einfuegen(7, pcm(7)), Einfuegung::Verdraengt(0));
        assert_eq!(p.fuellstand(), 4);
        assert_eq!(p.aelteste(), Some(1));
        assert_eq!(p.statistik().verdraengt, 1);
    }

    #[test]
    fn leerer_puffer_setzt_automatisch_fort() {
        let mut p = WiedergabePuffer::default();
        assert!(p.entnehmen().is_none());
        p.einfuegen(0, pcm(0));
        assert_eq!(p.entnehmen().map(|s| s.pcm), Some(pcm(0)));
        assert!(p.ist_leer());
    }

    #[test]
    fn leeren_verwirft_alles() {
        let mut p = WiedergabePuffer::neu(3);
        p.einfuegen(1, pcm(1));
        p.einfuegen(2, pcm(2));
        assert_eq!(p.leeren(), 2);
        assert!(p.ist_leer());
    }

    #[test]
    fn nach_leeren_beginnt_sequenz_neu() {
        let mut p = WiedergabePuffer::neu(4);
        for seq in 500..503 {
            p.einfuegen(seq, pcm(seq));
        }
        while p.entnehmen().is_some() {}
        assert_eq!(p.einfuegen(0, pcm(0)), Einfuegung::ZuSpaet);

        p.leeren();
        assert_eq!(p.einfuegen(0, pcm(0)), Einfuegung::Eingereiht);
        assert_eq!(p.einfuegen(1, pcm(1)), Einfuegung::Eingereiht);
        assert_eq!(p.entnehmen().map(|s| s.sequence), Some(0));
        assert_eq!(p.statistik().zu_spaet, 1);
    }

    #[derive(Debug, Clone)]
    enum Schritt {
        Einfuegen(u32),
        Entnehmen,
    }

    fn schritt() -> impl Strategy<Value = Schritt> {
        prop_oneof![
            3 => (0u32..64).prop_map(Schritt::Einfuegen),
            1 => Just(Schritt::Entnehmen),
        ]
    }

    proptest! {
        #[test]
        fn entnahme_ist_strikt_steigend(
            kapazitaet in 1usize..8,
            schritte in proptest::collection::vec(schritt(), 0..200),
        ) {
            let mut p = WiedergabePuffer::neu(kapazitaet);
            let mut entnommen = Vec::new();
            for s in schritte {
                match s {
                    Schritt::Einfuegen(seq) => {
                        p.einfuegen(seq, pcm(seq));
                    }
                    Schritt::Entnehmen => {
                        if let Some(seg) = p.entnehmen() {
                            entnommen.push(seg.sequence);
                        }
                    }
                }
                prop_assert!(p.fuellstand() <= kapazitaet);
            }
            entnommen.extend(std::iter::from_fn(|| p.entnehmen()).map(|s| s.sequence));
            prop_assert!(entnommen.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn zu_altes_wird_nie_entnommen(
            seqs in proptest::collection::vec(0u32..32, 1..64),
        ) {
            let mut p = WiedergabePuffer::neu(4);
            let mut abgewiesen = Vec::new();
            for seq in seqs {
                let niedrigste = p.aelteste();
                let ergebnis = p.einfuegen(seq, pcm(seq));
                if niedrigste.is_some_and(|n| seq < n) {
                    prop_assert_eq!(ergebnis, Einfuegung::ZuSpaet);
                    abgewiesen.push(seq);
                }
            }
            let rest: Vec<u32> = std::iter::from_fn(|| p.entnehmen()).map(|s| s.sequence).collect();
            for seq in abgewiesen {
                prop_assert!(!rest.contains(&seq));
            }
        }
    }
}
