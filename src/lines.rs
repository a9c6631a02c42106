//! Curated line-level constants: the network catalogue the build pipeline
//! walks, the terminal stations timetable fetches start from, and the
//! handful of segments timetables are known not to cover.

use crate::graph::Mode;

#[derive(Debug, Clone, Copy)]
pub struct LineInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub mode: Mode,
}

/// Every line the graph is built from. The provider's line-by-mode lookup
/// is deliberately not used: it drifts (ghost lines, renames) and the
/// network's line set changes rarely enough that a reviewed constant is
/// the safer input.
pub const LINE_CATALOGUE: &[LineInfo] = &[
    LineInfo { id: "bakerloo", name: "Bakerloo", mode: Mode::Tube },
    LineInfo { id: "central", name: "Central", mode: Mode::Tube },
    LineInfo { id: "circle", name: "Circle", mode: Mode::Tube },
    LineInfo { id: "district", name: "District", mode: Mode::Tube },
    LineInfo { id: "hammersmith-city", name: "Hammersmith & City", mode: Mode::Tube },
    LineInfo { id: "jubilee", name: "Jubilee", mode: Mode::Tube },
    LineInfo { id: "metropolitan", name: "Metropolitan", mode: Mode::Tube },
    LineInfo { id: "northern", name: "Northern", mode: Mode::Tube },
    LineInfo { id: "piccadilly", name: "Piccadilly", mode: Mode::Tube },
    LineInfo { id: "victoria", name: "Victoria", mode: Mode::Tube },
    LineInfo { id: "waterloo-city", name: "Waterloo & City", mode: Mode::Tube },
    LineInfo { id: "dlr", name: "DLR", mode: Mode::Dlr },
    LineInfo { id: "elizabeth", name: "Elizabeth line", mode: Mode::Elizabeth },
    LineInfo { id: "weaver", name: "Weaver", mode: Mode::Overground },
    LineInfo { id: "suffragette", name: "Suffragette", mode: Mode::Overground },
    LineInfo { id: "windrush", name: "Windrush", mode: Mode::Overground },
    LineInfo { id: "mildmay", name: "Mildmay", mode: Mode::Overground },
    LineInfo { id: "lioness", name: "Lioness", mode: Mode::Overground },
    LineInfo { id: "liberty", name: "Liberty", mode: Mode::Overground },
    LineInfo { id: "thameslink", name: "Thameslink", mode: Mode::NationalRail },
];

pub fn line_info(id: &str) -> Option<&'static LineInfo> {
    LINE_CATALOGUE.iter().find(|l| l.id == id)
}

pub fn line_mode(id: &str) -> Option<Mode> {
    line_info(id).map(|l| l.mode)
}

pub fn line_display_name(id: &str) -> &str {
    line_info(id).map(|l| l.name).unwrap_or(id)
}

/// Timetable query roots, per tube/DLR line. A terminal sees the whole
/// line (or one branch of it) in a single timetable response; the union
/// over a line's terminals covers every segment the timetable data can
/// cover at all.
pub const TERMINAL_STATIONS: &[(&str, &[&str])] = &[
    ("bakerloo", &["940GZZLUHAW", "940GZZLUEAC"]),
    (
        "central",
        &["940GZZLUWRP", "940GZZLUEPG", "940GZZLUEBY", "940GZZLUHLT"],
    ),
    ("circle", &["940GZZLUHSC", "940GZZLUERC"]),
    (
        "district",
        &["940GZZLUEBY", "940GZZLUUPM", "940GZZLURMD", "940GZZLUWIM", "940GZZLUERC"],
    ),
    ("hammersmith-city", &["940GZZLUHSC", "940GZZLUBKG"]),
    ("jubilee", &["940GZZLUSTM", "940GZZLUSTD"]),
    (
        "metropolitan",
        &["940GZZLUALD", "940GZZLUUXB", "940GZZLUAMS", "940GZZLUCSM", "940GZZLUWAF"],
    ),
    (
        "northern",
        &["940GZZLUEGW", "940GZZLUHBT", "940GZZLUMDN", "940GZZLUMHL", "940GZZBPSUST"],
    ),
    (
        "piccadilly",
        &["940GZZLUCKS", "940GZZLUHR5", "940GZZLUUXB"],
    ),
    ("victoria", &["940GZZLUWWL", "940GZZLUBXN"]),
    ("waterloo-city", &["940GZZLUWLO", "940GZZLUBNK"]),
    (
        "dlr",
        &["940GZZDLBNK", "940GZZDLLEW", "940GZZDLSTD", "940GZZDLWLA", "940GZZDLBEC"],
    ),
];

pub fn terminals_for(line: &str) -> &'static [&'static str] {
    TERMINAL_STATIONS
        .iter()
        .find(|(l, _)| *l == line)
        .map(|(_, t)| *t)
        .unwrap_or(&[])
}

/// Segments that never appear in terminal timetables (branch crossovers
/// and the Olympia shuttle); stage 5 weights these via the journey
/// endpoint instead. Station pairs, resolved to hubs at processing time;
/// each entry covers both directions.
pub const TIMETABLE_FALLBACK_PAIRS: &[(&str, &str, &str)] = &[
    ("dlr", "940GZZDLSTD", "940GZZDLCAN"),
    ("district", "940GZZLUECT", "940GZZLUKOY"),
    ("central", "940GZZLUGGH", "940GZZLUHLT"),
];
