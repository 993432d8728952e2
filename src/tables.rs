// Calibration tables for SPB captures.
//
// Scale settings travel on the wire as small indices; the device-side
// firmware resolves them against fixed tables. Which seconds/division
// table applies depends on the model character (4th byte of the file
// magic). Attenuation and volts/division use one table across all models.

/// Probe attenuation factors, indexed by the record's attenuation field.
static ATTENUATION_TABLE: [f32; 4] = [1.0e0, 1.0e1, 1.0e2, 1.0e3];

/// Volts per division, indexed by the record's volts_div field.
static VOLT_TABLE: [f32; 21] = [
            2.0e-3, 5.0e-3, // 1 mV
    1.0e-2, 2.0e-2, 5.0e-2, // 10 mV
    1.0e-1, 2.0e-1, 5.0e-1, // 100 mV
    1.0e+0, 2.0e+0, 5.0e+0, // 1 V
    1.0e+1, 2.0e+1, 5.0e+1, // 10 V
    1.0e+2, 2.0e+2, 5.0e+2, // 100 V
    1.0e+3, 2.0e+3, 5.0e+3, // 1 kV
    1.0e+4,                 // 10 kV
];

// 1, 2, 5 step
static TIME_TABLE_1_2_5: [f32; 36] = [
    1.0e-9, 2.0e-9, 5.0e-9, // 1 ns
    1.0e-8, 2.0e-8, 5.0e-8, // 10 ns
    1.0e-7, 2.0e-7, 5.0e-7, // 100 ns
    1.0e-6, 2.0e-6, 5.0e-6, // 1 us
    1.0e-5, 2.0e-5, 5.0e-5, // 10 us
    1.0e-4, 2.0e-4, 5.0e-4, // 100 us
    1.0e-3, 2.0e-3, 5.0e-3, // 1 ms
    1.0e-2, 2.0e-2, 5.0e-2, // 10 ms
    1.0e-1, 2.0e-1, 5.0e-1, // 100 ms
    1.0e+0, 2.0e+0, 5.0e+0, // 1 s
    1.0e+1, 2.0e+1, 5.0e+1, // 10 s
    1.0e+2, 2.0e+2, 5.0e+2, // 100 s
];

// 1, 2.5, 5 step
static TIME_TABLE_1_25_5: [f32; 36] = [
    1.0e-9, 2.5e-9, 5.0e-9, // 1 ns
    1.0e-8, 2.5e-8, 5.0e-8, // 10 ns
    1.0e-7, 2.5e-7, 5.0e-7, // 100 ns
    1.0e-6, 2.5e-6, 5.0e-6, // 1 us
    1.0e-5, 2.5e-5, 5.0e-5, // 10 us
    1.0e-4, 2.5e-4, 5.0e-4, // 100 us
    1.0e-3, 2.5e-3, 5.0e-3, // 1 ms
    1.0e-2, 2.5e-2, 5.0e-2, // 10 ms
    1.0e-1, 2.5e-1, 5.0e-1, // 100 ms
    1.0e+0, 2.5e+0, 5.0e+0, // 1 s
    1.0e+1, 2.5e+1, 5.0e+1, // 10 s
    1.0e+2, 2.5e+2, 5.0e+2, // 100 s
];

/// Attenuation table; one version across all models.
pub fn attenuation_table() -> &'static [f32] {
    &ATTENUATION_TABLE
}

/// Volts/division table; one version across all models.
pub fn volt_table() -> &'static [f32] {
    &VOLT_TABLE
}

/// Seconds/division table for the given model character.
///
/// Models differ in step progression (1-2-5 vs 1-2.5-5) and in the leading
/// entry their index 0 maps to (1 ns, 2 ns, or 5 ns), expressed here as an
/// offset into the shared progression. Returns `None` for models whose
/// tables are unknown; callers must treat that as unsupported rather than
/// assume a default.
pub fn time_table(model: char) -> Option<&'static [f32]> {
    match model {
        'M' => Some(&TIME_TABLE_1_2_5[0..]), // start at 1ns
        'N' => Some(&TIME_TABLE_1_2_5[1..]), // start at 2ns
        'O' | 'P' | 'Q' | 'R' | 'S' | 'T' | 'U' | 'W' | 'X' => {
            Some(&TIME_TABLE_1_2_5[2..]) // start at 5ns
        }
        'V' => Some(&TIME_TABLE_1_25_5[2..]), // start at 5ns
        _ => None,
    }
}
