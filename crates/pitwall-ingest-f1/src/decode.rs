//! Defensive decoding of the F1 UDP wire format.
//!
//! Only the three packet kinds this core consumes are recognised: Session
//! (ID 1), Lap Data (ID 2) and Car Status (ID 7). Everything else decodes to
//! [`Decoded::Ignored`]. Malformed or truncated datagrams decode to `None`
//! and must never panic; implausible field values degrade to `None` per
//! field rather than rejecting the packet.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use model::{ForecastSample, PitPhase, SafetyCarStatus, TyreClass, Weather, MAX_CARS};

/// F1 25 packet header size in bytes.
pub const HEADER_LEN: usize = 29;

pub const PACKET_ID_SESSION: u8 = 1;
pub const PACKET_ID_LAP_DATA: u8 = 2;
pub const PACKET_ID_CAR_STATUS: u8 = 7;

/// Packet formats outside this window are another game or garbage.
const FORMAT_MIN: u16 = 2020;
const FORMAT_MAX: u16 = 2030;

/// Per-car record sizes as observed on the wire.
pub const LAP_DATA_ENTRY_SIZE: usize = 57;
pub const CAR_STATUS_ENTRY_SIZE: usize = 55;

/// Minimum packet sizes for the per-slot packet kinds.
pub const MIN_LAP_DATA_PACKET_SIZE: usize = HEADER_LEN + MAX_CARS * LAP_DATA_ENTRY_SIZE;
pub const MIN_CAR_STATUS_PACKET_SIZE: usize = HEADER_LEN + MAX_CARS * CAR_STATUS_ENTRY_SIZE;

// Intra-record offsets, pinned empirically against the live feed.
const LAP_LAST_MS_OFFSET: usize = 48;
const LAP_PIT_STATUS_OFFSET: usize = 52;
const STATUS_ACTUAL_OFFSET: usize = 25;
const STATUS_VISUAL_OFFSET: usize = 26;

/// Safety-car byte sits 19 + 21*5 bytes past the header (after the marshal
/// zone array); forecast count two bytes later, samples right after that.
const SESSION_SAFETY_CAR_OFFSET: usize = 124;
const SESSION_MIN_LEN: usize = 150;
const FORECAST_STRIDE: usize = 8;

/// Sane lap-time band: tens of seconds to a few minutes.
pub const LAP_MS_MIN: u32 = 40_000;
pub const LAP_MS_MAX: u32 = 360_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_format: u16,
    pub packet_id: u8,
    pub session_uid: u64,
    pub player_car_index: u8,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionFrame {
    pub weather: Option<Weather>,
    pub track_temp_c: Option<i8>,
    pub air_temp_c: Option<i8>,
    pub safety_car: Option<SafetyCarStatus>,
    pub forecast: Vec<ForecastSample>,
    pub rain_now_pct: Option<u8>,
    pub rain_next_pct: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapEntry {
    pub last_lap_ms: Option<u32>,
    pub pit: PitPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub actual_compound: u8,
    pub tyre: TyreClass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Session(SessionFrame),
    LapData([LapEntry; MAX_CARS]),
    CarStatus([StatusEntry; MAX_CARS]),
    Ignored,
}

/// Parse the fixed-size packet header, or `None` when the datagram is too
/// short to hold one.
pub fn parse_header(raw: &[u8]) -> Option<PacketHeader> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let mut c = Cursor::new(raw);
    let packet_format = c.read_u16::<LittleEndian>().ok()?;
    let _game_year = c.read_u8().ok()?;
    let _game_major = c.read_u8().ok()?;
    let _game_minor = c.read_u8().ok()?;
    let _packet_version = c.read_u8().ok()?;
    let packet_id = c.read_u8().ok()?;
    let session_uid = c.read_u64::<LittleEndian>().ok()?;
    let _session_time = c.read_f32::<LittleEndian>().ok()?;
    let _frame_identifier = c.read_u32::<LittleEndian>().ok()?;
    let _overall_frame_identifier = c.read_u32::<LittleEndian>().ok()?;
    let player_car_index = c.read_u8().ok()?;
    Some(PacketHeader { packet_format, packet_id, session_uid, player_car_index })
}

/// Classify and decode one datagram.
pub fn decode(raw: &[u8]) -> Option<(PacketHeader, Decoded)> {
    let hdr = parse_header(raw)?;
    if !(FORMAT_MIN..=FORMAT_MAX).contains(&hdr.packet_format) {
        return None;
    }
    let decoded = match hdr.packet_id {
        PACKET_ID_SESSION => Decoded::Session(parse_session(raw)?),
        PACKET_ID_LAP_DATA => Decoded::LapData(parse_lap_data(raw)?),
        PACKET_ID_CAR_STATUS => Decoded::CarStatus(parse_car_status(raw)?),
        _ => Decoded::Ignored,
    };
    Some((hdr, decoded))
}

fn plausible_temp(raw: i8) -> Option<i8> {
    (-30..=80).contains(&raw).then_some(raw)
}

fn parse_session(raw: &[u8]) -> Option<SessionFrame> {
    if raw.len() < SESSION_MIN_LEN {
        return None;
    }
    let base = HEADER_LEN;
    let weather = Weather::from_raw(raw[base]);
    let track_temp_c = plausible_temp(raw[base + 1] as i8);
    let air_temp_c = plausible_temp(raw[base + 2] as i8);

    let sc_off = base + SESSION_SAFETY_CAR_OFFSET;
    if sc_off + 3 >= raw.len() {
        return None;
    }
    let safety_car = SafetyCarStatus::from_raw(raw[sc_off]);
    let count = raw[sc_off + 2] as usize;
    let fc_off = sc_off + 3;

    let mut forecast = Vec::new();
    if count > 0 && fc_off + count * FORECAST_STRIDE <= raw.len() {
        for j in 0..count {
            let o = fc_off + j * FORECAST_STRIDE;
            let time_offset_min = raw[o + 1];
            let weather_raw = raw[o + 2];
            let rain_pct = raw[o + 7];
            // implausible samples are dropped one by one, the packet survives
            if time_offset_min > 240 || rain_pct > 100 {
                continue;
            }
            if let Some(weather) = Weather::from_raw(weather_raw) {
                forecast.push(ForecastSample { time_offset_min, rain_pct, weather });
            }
        }
        forecast.sort_by_key(|s| s.time_offset_min);
        forecast.dedup_by_key(|s| s.time_offset_min);
    }

    let rain_now_pct = forecast.iter().find(|s| s.time_offset_min == 0).map(|s| s.rain_pct);
    // nearest future sample; if the feed never sent one, the earliest sample
    let rain_next_pct = forecast
        .iter()
        .find(|s| s.time_offset_min > 0)
        .or_else(|| forecast.first())
        .map(|s| s.rain_pct);

    Some(SessionFrame {
        weather,
        track_temp_c,
        air_temp_c,
        safety_car,
        forecast,
        rain_now_pct,
        rain_next_pct,
    })
}

fn parse_lap_data(raw: &[u8]) -> Option<[LapEntry; MAX_CARS]> {
    if raw.len() < MIN_LAP_DATA_PACKET_SIZE {
        return None;
    }
    Some(std::array::from_fn(|i| {
        let off = HEADER_LEN + i * LAP_DATA_ENTRY_SIZE;
        let ms = LittleEndian::read_u32(&raw[off + LAP_LAST_MS_OFFSET..off + LAP_LAST_MS_OFFSET + 4]);
        LapEntry {
            last_lap_ms: (LAP_MS_MIN..=LAP_MS_MAX).contains(&ms).then_some(ms),
            pit: PitPhase::from_raw(raw[off + LAP_PIT_STATUS_OFFSET]),
        }
    }))
}

fn parse_car_status(raw: &[u8]) -> Option<[StatusEntry; MAX_CARS]> {
    if raw.len() < MIN_CAR_STATUS_PACKET_SIZE {
        return None;
    }
    Some(std::array::from_fn(|i| {
        let off = HEADER_LEN + i * CAR_STATUS_ENTRY_SIZE;
        StatusEntry {
            actual_compound: raw[off + STATUS_ACTUAL_OFFSET],
            tyre: TyreClass::from_visual(raw[off + STATUS_VISUAL_OFFSET]),
        }
    }))
}

// ── Packet builders (tests and feed simulation) ──────────────────────────────

/// Build a 29-byte header.
pub fn build_header(packet_format: u16, packet_id: u8, session_uid: u64, player_index: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.extend_from_slice(&packet_format.to_le_bytes());
    buf.push(25); // game year
    buf.push(1); // major version
    buf.push(0); // minor version
    buf.push(1); // packet version
    buf.push(packet_id);
    buf.extend_from_slice(&session_uid.to_le_bytes());
    buf.extend_from_slice(&0f32.to_le_bytes()); // session time
    buf.extend_from_slice(&0u32.to_le_bytes()); // frame identifier
    buf.extend_from_slice(&0u32.to_le_bytes()); // overall frame identifier
    buf.push(player_index);
    buf.push(255); // secondary player index
    buf
}

/// Build a Session packet; forecast entries are `(time_offset_min, weather, rain_pct)`.
pub fn build_session_packet(
    session_uid: u64,
    player_index: u8,
    weather: u8,
    track_temp: i8,
    air_temp: i8,
    safety_car: u8,
    forecast: &[(u8, u8, u8)],
) -> Vec<u8> {
    let mut buf = build_header(2025, PACKET_ID_SESSION, session_uid, player_index);
    buf.resize(HEADER_LEN + SESSION_SAFETY_CAR_OFFSET + 3, 0);
    buf[HEADER_LEN] = weather;
    buf[HEADER_LEN + 1] = track_temp as u8;
    buf[HEADER_LEN + 2] = air_temp as u8;
    buf[HEADER_LEN + SESSION_SAFETY_CAR_OFFSET] = safety_car;
    buf[HEADER_LEN + SESSION_SAFETY_CAR_OFFSET + 2] = forecast.len() as u8;
    for &(t, w, r) in forecast {
        let mut rec = [0u8; FORECAST_STRIDE];
        rec[1] = t;
        rec[2] = w;
        rec[7] = r;
        buf.extend_from_slice(&rec);
    }
    // the safety-car region must end strictly inside the packet
    let min_len = (HEADER_LEN + SESSION_SAFETY_CAR_OFFSET + 4).max(SESSION_MIN_LEN);
    if buf.len() < min_len {
        buf.resize(min_len, 0);
    }
    buf
}

/// Build a Lap Data packet from per-slot `(last_lap_ms, pit_status)` pairs.
pub fn build_lap_data_packet(
    session_uid: u64,
    player_index: u8,
    entries: &[(u32, u8); MAX_CARS],
) -> Vec<u8> {
    let mut buf = build_header(2025, PACKET_ID_LAP_DATA, session_uid, player_index);
    for &(ms, pit) in entries {
        let mut rec = [0u8; LAP_DATA_ENTRY_SIZE];
        rec[LAP_LAST_MS_OFFSET..LAP_LAST_MS_OFFSET + 4].copy_from_slice(&ms.to_le_bytes());
        rec[LAP_PIT_STATUS_OFFSET] = pit;
        buf.extend_from_slice(&rec);
    }
    buf
}

/// Build a Car Status packet from per-slot visual-compound bytes.
pub fn build_car_status_packet(
    session_uid: u64,
    player_index: u8,
    visuals: &[u8; MAX_CARS],
) -> Vec<u8> {
    let mut buf = build_header(2025, PACKET_ID_CAR_STATUS, session_uid, player_index);
    for &v in visuals {
        let mut rec = [0u8; CAR_STATUS_ENTRY_SIZE];
        rec[STATUS_ACTUAL_OFFSET] = v;
        rec[STATUS_VISUAL_OFFSET] = v;
        buf.extend_from_slice(&rec);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let raw = build_header(2025, PACKET_ID_SESSION, 0xDEAD_BEEF, 7);
        assert_eq!(raw.len(), HEADER_LEN);
        let h = parse_header(&raw).unwrap();
        assert_eq!(h.packet_format, 2025);
        assert_eq!(h.packet_id, PACKET_ID_SESSION);
        assert_eq!(h.session_uid, 0xDEAD_BEEF);
        assert_eq!(h.player_car_index, 7);
    }

    #[test]
    fn short_datagrams_reject() {
        assert!(parse_header(&[]).is_none());
        assert!(parse_header(&[0u8; 28]).is_none());
        assert!(decode(&[0u8; 10]).is_none());
    }

    #[test]
    fn foreign_format_rejects() {
        let raw = build_header(1999, PACKET_ID_SESSION, 1, 0);
        assert!(decode(&raw).is_none());
    }

    #[test]
    fn unknown_packet_id_is_ignored() {
        let raw = build_header(2025, 11, 1, 0);
        let (_, decoded) = decode(&raw).unwrap();
        assert_eq!(decoded, Decoded::Ignored);
    }

    #[test]
    fn session_packet_extracts_fields() {
        let raw = build_session_packet(1, 0, 4, 21, 24, 2, &[(0, 4, 80), (5, 3, 60)]);
        let (_, decoded) = decode(&raw).unwrap();
        let Decoded::Session(s) = decoded else { panic!("expected session") };
        assert_eq!(s.weather, Some(Weather::HeavyRain));
        assert_eq!(s.track_temp_c, Some(21));
        assert_eq!(s.air_temp_c, Some(24));
        assert_eq!(s.safety_car, Some(SafetyCarStatus::Virtual));
        assert_eq!(s.forecast.len(), 2);
        assert_eq!(s.rain_now_pct, Some(80));
        assert_eq!(s.rain_next_pct, Some(60));
    }

    #[test]
    fn forecast_sorts_dedups_and_guards_each_sample() {
        let raw = build_session_packet(
            1,
            0,
            3,
            20,
            22,
            0,
            &[
                (10, 3, 40),
                (0, 4, 80),
                (10, 3, 55), // duplicate offset: first (after sort) wins
                (250, 3, 50), // offset out of range: dropped
                (15, 9, 50),  // weather out of range: dropped
                (20, 2, 120), // rain out of range: dropped
            ],
        );
        let (_, decoded) = decode(&raw).unwrap();
        let Decoded::Session(s) = decoded else { panic!("expected session") };
        let offsets: Vec<u8> = s.forecast.iter().map(|f| f.time_offset_min).collect();
        assert_eq!(offsets, vec![0, 10]);
        assert_eq!(s.rain_now_pct, Some(80));
        assert_eq!(s.rain_next_pct, Some(40));
    }

    #[test]
    fn rain_next_falls_back_to_earliest_without_future_samples() {
        // no zero-offset sample and no future sample beyond it
        let raw = build_session_packet(1, 0, 3, 20, 22, 0, &[(0, 3, 45)]);
        let (_, d) = decode(&raw).unwrap();
        let Decoded::Session(s) = d else { panic!() };
        assert_eq!(s.rain_now_pct, Some(45));
        assert_eq!(s.rain_next_pct, Some(45)); // fallback: earliest available

        let raw = build_session_packet(1, 0, 3, 20, 22, 0, &[]);
        let (_, d) = decode(&raw).unwrap();
        let Decoded::Session(s) = d else { panic!() };
        assert_eq!(s.rain_now_pct, None);
        assert_eq!(s.rain_next_pct, None);
    }

    #[test]
    fn session_implausible_scalars_degrade_to_none() {
        let raw = build_session_packet(1, 0, 9, 110, -40, 7, &[]);
        let (_, d) = decode(&raw).unwrap();
        let Decoded::Session(s) = d else { panic!() };
        assert_eq!(s.weather, None);
        assert_eq!(s.track_temp_c, None);
        assert_eq!(s.air_temp_c, None);
        assert_eq!(s.safety_car, None);
    }

    #[test]
    fn truncated_forecast_array_drops_all_samples() {
        let mut raw = build_session_packet(1, 0, 3, 20, 22, 0, &[(0, 3, 45), (5, 3, 50)]);
        raw.truncate(raw.len() - 6); // cut into the second sample
        let (_, d) = decode(&raw).unwrap();
        let Decoded::Session(s) = d else { panic!() };
        assert!(s.forecast.is_empty());
    }

    #[test]
    fn lap_data_keeps_only_plausible_times() {
        let mut entries = [(0u32, 0u8); MAX_CARS];
        entries[0] = (92_345, 0);
        entries[1] = (5_000, 0); // sub-40s: garbage
        entries[2] = (400_000, 0); // beyond the band
        entries[3] = (92_345, 2);
        let raw = build_lap_data_packet(1, 0, &entries);
        let (_, d) = decode(&raw).unwrap();
        let Decoded::LapData(laps) = d else { panic!() };
        assert_eq!(laps[0].last_lap_ms, Some(92_345));
        assert_eq!(laps[1].last_lap_ms, None);
        assert_eq!(laps[2].last_lap_ms, None);
        assert_eq!(laps[3].pit, PitPhase::PendingTyreReveal);
        assert_eq!(laps[0].pit, PitPhase::OnTrack);
    }

    #[test]
    fn lap_data_too_short_rejects() {
        let entries = [(0u32, 0u8); MAX_CARS];
        let mut raw = build_lap_data_packet(1, 0, &entries);
        raw.truncate(MIN_LAP_DATA_PACKET_SIZE - 1);
        assert!(decode(&raw).is_none());
    }

    #[test]
    fn car_status_maps_visual_compounds() {
        let mut visuals = [16u8; MAX_CARS];
        visuals[1] = 7;
        visuals[2] = 8;
        let raw = build_car_status_packet(1, 0, &visuals);
        let (_, d) = decode(&raw).unwrap();
        let Decoded::CarStatus(st) = d else { panic!() };
        assert_eq!(st[0].tyre, TyreClass::Slick);
        assert_eq!(st[1].tyre, TyreClass::Intermediate);
        assert_eq!(st[2].tyre, TyreClass::Wet);
    }
}
