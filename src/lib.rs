pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod encoding;
pub mod epochs;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod plot;
pub mod raw;
pub mod read;
pub mod split;
pub mod survey;
pub mod train;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    mod normalize {
        use approx::assert_abs_diff_eq;
        use ndarray::{array, Array2};

        use crate::normalize::ZScore;

        #[test]
        fn zero_mean_unit_std() {
            let mut epoch = array![[1.0f32, 2.0, 3.0, 4.0], [10.0, -3.0, 0.5, 7.0]];
            epoch.zscore_inplace();

            let n = epoch.len() as f32;
            let mean = epoch.sum() / n;
            let std = (epoch.mapv(|v| (v - mean).powi(2)).sum() / n).sqrt();
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(std, 1.0, epsilon = 1e-5);
        }

        #[test]
        fn returns_removed_moments() {
            let mut x = array![2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
            let (mean, std) = x.zscore_inplace();
            assert_abs_diff_eq!(mean, 5.0, epsilon = 1e-12);
            assert_abs_diff_eq!(std, 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(x[0], -1.5, epsilon = 1e-12);
        }

        #[test]
        fn constant_epoch_untouched() {
            let mut epoch = Array2::from_elem((3, 5), 2.5f32);
            let (_, std) = epoch.zscore_inplace();
            assert_eq!(std, 0.0);
            assert!(epoch.iter().all(|&v| v == 2.5));
        }
    }

    mod labels {
        use crate::labels::{quadrant_target, Quadrant, DEFAULT_THRESHOLD};

        #[test]
        fn reference_points() {
            assert_eq!(quadrant_target(0.05, 0.02, DEFAULT_THRESHOLD), [0.0, 0.0, 1.0]);
            assert_eq!(quadrant_target(1.0, 1.0, DEFAULT_THRESHOLD), [1.0, 1.0, 0.0]);
            assert_eq!(quadrant_target(-1.0, 0.5, DEFAULT_THRESHOLD), [0.0, 1.0, 0.0]);
        }

        #[test]
        fn boundaries() {
            // On the circle counts as neutral
            assert_eq!(Quadrant::classify(0.4, 0.0, 0.4), Quadrant::Neutral);
            assert_eq!(Quadrant::classify(1.0, 0.0, 0.4), Quadrant::HighValenceLowArousal);
            assert_eq!(Quadrant::classify(0.0, 1.0, 0.4), Quadrant::LowValenceHighArousal);
            assert_eq!(Quadrant::classify(-1.0, -1.0, 0.4), Quadrant::LowValenceLowArousal);
            assert_eq!(quadrant_target(-1.0, -1.0, 0.4), [0.0, 0.0, 0.0]);
        }

        #[test]
        fn every_point_gets_one_region() {
            let steps = (-20..=20).map(|i| i as f64 / 10.0).collect::<Vec<f64>>();
            for &v in &steps {
                for &a in &steps {
                    let q = Quadrant::classify(v, a, DEFAULT_THRESHOLD);
                    let expected = if v * v + a * a <= DEFAULT_THRESHOLD * DEFAULT_THRESHOLD {
                        Quadrant::Neutral
                    } else {
                        match (v > 0.0, a > 0.0) {
                            (true, true) => Quadrant::HighValenceHighArousal,
                            (true, false) => Quadrant::HighValenceLowArousal,
                            (false, true) => Quadrant::LowValenceHighArousal,
                            (false, false) => Quadrant::LowValenceLowArousal,
                        }
                    };
                    assert_eq!(q, expected, "v={} a={}", v, a);
                }
            }
        }
    }

    mod survey {
        use crate::encoding::Feature;
        use crate::error::Error;
        use crate::survey::{select_subjects, FormTable, RatingsTable};

        const FORM: &str = ",code,gender,age\n0,bbbb02,F,31\n1,aaaa01,M,25\n2,krki20,M,40\n3,zzzz99,F,22\n";
        const RATINGS: &str = "code,img_name,valence,arousal\n\
                               aaaa01,img1,0.5,-0.25\n\
                               bbbb02,img1,-1,1\n\
                               krki20,img2,0,0\n";

        fn tables() -> (FormTable, RatingsTable) {
            let form = FormTable::from_reader(csv::Reader::from_reader(FORM.as_bytes()), "form").unwrap();
            let ratings =
                RatingsTable::from_reader(csv::Reader::from_reader(RATINGS.as_bytes()), "ratings").unwrap();
            (form, ratings)
        }

        #[test]
        fn form_drops_index_and_code() {
            let (form, _) = tables();
            assert_eq!(form.columns, vec!["gender", "age"]);
            let record = form.record("aaaa01").unwrap();
            assert_eq!(
                record.features,
                vec![Feature::Text("M".to_string()), Feature::Number(25.0)]
            );
        }

        #[test]
        fn intersection_minus_denylist() {
            let (form, ratings) = tables();
            let excluded = vec!["krki20".to_string()];
            assert_eq!(select_subjects(&form, &ratings, &excluded), vec!["aaaa01", "bbbb02"]);
            assert_eq!(
                select_subjects(&form, &ratings, &[]),
                vec!["aaaa01", "bbbb02", "krki20"]
            );
        }

        #[test]
        fn ratings_per_subject() {
            let (_, ratings) = tables();
            let r = ratings.for_subject("aaaa01");
            assert_eq!(r.len(), 1);
            assert_eq!(r[0].image, "img1");
            assert_eq!(r[0].valence, 0.5);
            assert_eq!(r[0].arousal, -0.25);
        }

        #[test]
        fn missing_column() {
            let csv = "code,img_name,valence\naaaa01,img1,0.5\n";
            let err = RatingsTable::from_reader(csv::Reader::from_reader(csv.as_bytes()), "ratings")
                .unwrap_err();
            assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "arousal"));
        }

        #[test]
        fn non_numeric_rating() {
            let csv = "code,img_name,valence,arousal\naaaa01,img1,high,0.5\n";
            let err = RatingsTable::from_reader(csv::Reader::from_reader(csv.as_bytes()), "ratings")
                .unwrap_err();
            assert!(matches!(err, Error::InvalidValue { row: 0, .. }));
        }
    }

    mod encoding {
        use approx::assert_abs_diff_eq;

        use crate::encoding::{Feature, InfoMatrix, LabelEncoder};
        use crate::error::Error;

        fn matrix() -> InfoMatrix {
            let rows = [["b", "10", "80"], ["a", "9", "40"], ["c", "10", "0"], ["a", "2", "20"]];
            InfoMatrix {
                rows: rows
                    .iter()
                    .map(|r| r.iter().map(|v| Feature::parse(v)).collect())
                    .collect(),
            }
        }

        #[test]
        fn codes_cover_distinct_values() {
            let mut info = matrix();
            let encoders = info.encode_categorical(&[0]).unwrap();
            assert_eq!(encoders[0].classes().len(), 3);

            let codes = info.rows.iter().map(|r| r[0].as_number().unwrap()).collect::<Vec<f64>>();
            assert_eq!(codes, vec![1.0, 0.0, 2.0, 0.0]);
            assert!(codes.iter().all(|&c| (0.0..3.0).contains(&c)));
        }

        #[test]
        fn numbers_sort_numerically() {
            let values = ["10", "9", "10", "2"].map(Feature::parse);
            let encoder = LabelEncoder::fit(values.iter());
            assert_eq!(encoder.transform(&Feature::Number(2.0)), Some(0));
            assert_eq!(encoder.transform(&Feature::Number(9.0)), Some(1));
            assert_eq!(encoder.transform(&Feature::Number(10.0)), Some(2));
            assert_eq!(encoder.transform(&Feature::Number(3.0)), None);
        }

        #[test]
        fn scale_and_export() {
            let mut info = matrix();
            info.encode_categorical(&[0]).unwrap();
            info.scale(&[2], 40.0).unwrap();
            let array = info.to_array().unwrap();
            assert_eq!(array.dim(), (4, 3));
            assert_abs_diff_eq!(array[[0, 2]], 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(array[[3, 2]], 0.5, epsilon = 1e-12);
        }

        #[test]
        fn text_left_unencoded() {
            let info = matrix();
            assert!(matches!(
                info.to_array(),
                Err(Error::NonNumericFeature { column: 0, .. })
            ));
            let mut info = matrix();
            assert!(info.scale(&[0], 40.0).is_err());
            assert!(info.encode_categorical(&[5]).is_err());
        }
    }

    mod split {
        use std::collections::BTreeSet;

        use rand::rngs::StdRng;
        use rand::SeedableRng;

        use crate::split::train_val_test;

        #[test]
        fn eighty_ten_ten() {
            let mut rng = StdRng::seed_from_u64(42);
            let p = train_val_test(100, 0.2, 0.5, &mut rng);
            assert_eq!((p.train.len(), p.validation.len(), p.test.len()), (80, 10, 10));

            let all = p
                .train
                .iter()
                .chain(&p.validation)
                .chain(&p.test)
                .copied()
                .collect::<BTreeSet<usize>>();
            assert_eq!(all, (0..100).collect::<BTreeSet<usize>>());
        }

        #[test]
        fn held_out_sizes_round_up() {
            let mut rng = StdRng::seed_from_u64(0);
            let p = train_val_test(7, 0.2, 0.5, &mut rng);
            assert_eq!((p.train.len(), p.validation.len(), p.test.len()), (5, 1, 1));
        }

        #[test]
        fn seeded_split_is_reproducible() {
            let a = train_val_test(50, 0.2, 0.5, &mut StdRng::seed_from_u64(7));
            let b = train_val_test(50, 0.2, 0.5, &mut StdRng::seed_from_u64(7));
            assert_eq!(a, b);
        }
    }

    mod config {
        use std::path::PathBuf;

        use crate::config::{ExperimentConfig, RecordingInfo, DEFAULT_EXCLUDED_CODES};
        use crate::error::Error;
        use crate::read::RecordingFormat;

        #[test]
        fn defaults() {
            let cfg = ExperimentConfig::default();
            cfg.validate().unwrap();
            assert_eq!(cfg.excluded_codes, DEFAULT_EXCLUDED_CODES.to_vec());
            assert_eq!(cfg.categorical_columns, vec![0, 2, 3]);
            assert_eq!(cfg.scaled_columns, vec![4, 5, 6, 7, 8]);
            assert_eq!(cfg.training().batch_size, 16);
            assert_eq!(cfg.model().kernel_length, 64);
        }

        #[test]
        fn ini_overrides() {
            let ini = "\
[paths]
artifacts = /tmp/artifacts
figure = out/report.png

[subjects]
excluded = aaaa01, bbbb02

[training]
epochs = 3
learning_rate = 0.001
seed = 7

[model]
kernel_length = 16
separable_pool_length = 4
dropout = 0.25

[preprocessing]
format = xdf
runs = 2, 3
save_images = false
";
            let cfg = ExperimentConfig::from_ini_str(ini).unwrap();
            cfg.validate().unwrap();
            assert_eq!(cfg.artifacts_dir, PathBuf::from("/tmp/artifacts"));
            assert_eq!(cfg.figure_path, Some(PathBuf::from("out/report.png")));
            assert_eq!(cfg.excluded_codes, vec!["aaaa01", "bbbb02"]);
            assert_eq!(cfg.epochs, 3);
            assert_eq!(cfg.seed, 7);
            assert_eq!(cfg.kernel_length, 16);
            let training = cfg.training();
            assert_eq!(training.learning_rate, 0.001);
            assert_eq!(training.model.separable_pool_length, 4);
            assert_eq!(training.model.dropout, 0.25);
            assert_eq!(cfg.preprocessing.format, RecordingFormat::Xdf);
            assert_eq!(cfg.preprocessing.runs, vec!["2", "3"]);
            assert!(!cfg.preprocessing.save_images);
            // Untouched keys keep their defaults
            assert_eq!(cfg.batch_size, 16);
        }

        #[test]
        fn invalid_values() {
            assert!(matches!(
                ExperimentConfig::from_ini_str("[training]\nepochs = many\n"),
                Err(Error::Config(_))
            ));
            assert!(matches!(
                ExperimentConfig::from_ini_str("[preprocessing]\nformat = edf\n"),
                Err(Error::Config(_))
            ));

            let cfg = ExperimentConfig {
                dropout: 1.0,
                ..Default::default()
            };
            assert!(matches!(cfg.validate(), Err(Error::Config(_))));

            let cfg = ExperimentConfig {
                test_fraction: 1.0,
                ..Default::default()
            };
            assert!(cfg.validate().is_err());

            let cfg = ExperimentConfig {
                scaled_columns: vec![0],
                ..Default::default()
            };
            assert!(cfg.validate().is_err());
        }

        #[test]
        fn recording_info_json() {
            // Keys this reader does not know, like an older `eog_marker`, are ignored
            let info: RecordingInfo = serde_json::from_str(
                r#"{"channels": ["Fp1", "Fp2"], "t_max": 0.8, "eog_marker": "VEOG"}"#,
            )
            .unwrap();
            assert_eq!(info.channels, vec!["Fp1", "Fp2"]);
            assert_eq!(info.t_max, 0.8);
            assert_eq!(info.t_min, -0.2);
            assert_eq!(info.stimulus_type, "Stimulus");
            info.validate().unwrap();

            let empty = RecordingInfo {
                t_min: 0.5,
                t_max: 0.5,
                ..Default::default()
            };
            assert!(empty.validate().is_err());
        }
    }

    mod brainvision {
        use std::fs;
        use std::path::Path;

        use approx::assert_abs_diff_eq;

        use crate::error::Error;
        use crate::read::brainvision_core::{load_markers, load_raw, Header};
        use crate::read::{BIDSPath, RecordingFormat};

        const VHDR: &str = "Brain Vision Data Exchange Header File Version 1.0
; Data created by a test

[Common Infos]
Codepage=UTF-8
DataFile=test.eeg
MarkerFile=test.vmrk
DataFormat=BINARY
DataOrientation=MULTIPLEXED
NumberOfChannels=2
SamplingInterval=4000

[Binary Infos]
BinaryFormat=IEEE_FLOAT_32

[Channel Infos]
Ch1=Fp1,,0.5,µV
Ch2=EOG1,,1,µV

[Comment]
Amplifier setup: free text = not ini
";

        const VMRK: &str = "Brain Vision Data Exchange Marker File, Version 1.0

[Common Infos]
Codepage=UTF-8
DataFile=test.eeg

[Marker Infos]
Mk1=New Segment,,1,1,0
Mk2=Stimulus,img1/happy,3,1,0
";

        fn write_recording(dir: &Path) {
            fs::write(dir.join("test.vhdr"), VHDR).unwrap();
            fs::write(dir.join("test.vmrk"), VMRK).unwrap();
            let samples = [[1.0f32, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
            let bytes = samples
                .iter()
                .flatten()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<u8>>();
            fs::write(dir.join("test.eeg"), bytes).unwrap();
        }

        #[test]
        fn header_fields() {
            let dir = tempfile::tempdir().unwrap();
            write_recording(dir.path());
            let header = Header::load(dir.path().join("test.vhdr")).unwrap();
            assert_eq!(header.num_channels(), 2);
            assert_abs_diff_eq!(header.sfreq(), 250.0, epsilon = 1e-9);
            assert_eq!(header.channel_names(), vec!["Fp1", "EOG1"]);
            assert_eq!(header.channel_references(), vec!["Cz", "Cz"]);
            assert_eq!(header.channel_units(), vec!["µV", "µV"]);
            assert_eq!(header.data_file(), dir.path().join("test.eeg"));
            assert!(header.comment().unwrap().starts_with("Amplifier setup"));
        }

        #[test]
        fn multiplexed_float_data() {
            let dir = tempfile::tempdir().unwrap();
            write_recording(dir.path());
            let raw = load_raw(dir.path().join("test.vhdr")).unwrap();

            assert_eq!(raw.data().dim(), (2, 4));
            let expected = [[0.5, 1.0, 1.5, 2.0], [10.0, 20.0, 30.0, 40.0]];
            for (row, e) in raw.data().rows().into_iter().zip(expected.iter()) {
                for (v, e) in row.iter().zip(e.iter()) {
                    assert_abs_diff_eq!(v, e, epsilon = 1e-6);
                }
            }

            let stimulus = &raw.markers()[1];
            assert_eq!(stimulus.kind, "Stimulus");
            assert_eq!(stimulus.description, "img1/happy");
            assert_eq!(stimulus.position, 2);
        }

        #[test]
        fn truncated_data_file() {
            let dir = tempfile::tempdir().unwrap();
            write_recording(dir.path());
            fs::write(dir.path().join("test.eeg"), [0u8; 6]).unwrap();
            assert!(matches!(
                load_raw(dir.path().join("test.vhdr")),
                Err(Error::Recording { .. })
            ));
        }

        #[test]
        fn missing_binary_format() {
            let dir = tempfile::tempdir().unwrap();
            let vhdr = VHDR.replace("BinaryFormat=IEEE_FLOAT_32", "");
            fs::write(dir.path().join("bad.vhdr"), vhdr).unwrap();
            assert!(matches!(
                Header::load(dir.path().join("bad.vhdr")),
                Err(Error::Recording { .. })
            ));
        }

        #[test]
        fn invalid_marker_position() {
            let dir = tempfile::tempdir().unwrap();
            let vmrk = VMRK.replace("img1/happy,3", "img1/happy,x");
            fs::write(dir.path().join("bad.vmrk"), vmrk).unwrap();
            assert!(load_markers(dir.path().join("bad.vmrk")).is_err());
        }

        #[test]
        fn bids_header_name() {
            let bids = BIDSPath::new("/data", "thko03", None, "eeg");
            assert_eq!(
                bids.recording_file("images", Some("2"), RecordingFormat::BrainVision),
                Path::new("/data/sub-thko03/eeg/sub-thko03_task-images_run-2_eeg.vhdr")
            );
            let bids = BIDSPath::new("/data", "thko03", Some("01"), "eeg");
            assert_eq!(
                bids.recording_file("images", None, RecordingFormat::BrainVision),
                Path::new("/data/sub-thko03/ses-01/eeg/sub-thko03_ses-01_task-images_eeg.vhdr")
            );
        }
    }

    mod xdf {
        use std::fs;
        use std::path::Path;

        use approx::assert_abs_diff_eq;

        use crate::error::Error;
        use crate::read::xdf::{load_raw, load_streams, ChannelFormat, StreamHeader};
        use crate::read::{BIDSPath, RecordingFormat};

        fn chunk(tag: u16, content: &[u8]) -> Vec<u8> {
            let mut out = vec![4u8];
            out.extend((content.len() as u32 + 2).to_le_bytes());
            out.extend(tag.to_le_bytes());
            out.extend(content);
            out
        }

        fn stream_header(id: u32, name: &str, kind: &str, count: usize, srate: f64, format: &str, labels: &[&str]) -> Vec<u8> {
            let channels = labels
                .iter()
                .map(|l| format!("<channel><label>{}</label><unit>microvolts</unit></channel>", l))
                .collect::<String>();
            let xml = format!(
                "<?xml version=\"1.0\"?><info><name>{name}</name><type>{kind}</type>\
                 <channel_count>{count}</channel_count><nominal_srate>{srate}</nominal_srate>\
                 <channel_format>{format}</channel_format><desc><channels>{channels}</channels></desc></info>"
            );
            let mut content = id.to_le_bytes().to_vec();
            content.extend(xml.as_bytes());
            chunk(2, &content)
        }

        // Only the first sample carries a timestamp
        fn eeg_samples(id: u32, start: f64, rows: &[[f32; 2]]) -> Vec<u8> {
            let mut content = id.to_le_bytes().to_vec();
            content.extend([1u8, rows.len() as u8]);
            for (i, row) in rows.iter().enumerate() {
                if i == 0 {
                    content.push(8);
                    content.extend(start.to_le_bytes());
                } else {
                    content.push(0);
                }
                row.iter().for_each(|v| content.extend(v.to_le_bytes()));
            }
            chunk(3, &content)
        }

        fn marker_samples(id: u32, markers: &[(f64, &str)]) -> Vec<u8> {
            let mut content = id.to_le_bytes().to_vec();
            content.extend([1u8, markers.len() as u8]);
            for (t, text) in markers {
                content.push(8);
                content.extend(t.to_le_bytes());
                content.extend([1u8, text.len() as u8]);
                content.extend(text.as_bytes());
            }
            chunk(3, &content)
        }

        fn clock_offset(id: u32, offset: f64) -> Vec<u8> {
            let mut content = id.to_le_bytes().to_vec();
            content.extend(0.0f64.to_le_bytes());
            content.extend(offset.to_le_bytes());
            chunk(4, &content)
        }

        // 10 samples at 100 Hz from t = 5 s, split over two chunks, and a marker stream
        fn recording() -> Vec<u8> {
            let rows = (0..10).map(|t| [t as f32, -(t as f32)]).collect::<Vec<[f32; 2]>>();
            let mut bytes = b"XDF:".to_vec();
            bytes.extend(chunk(1, b"<?xml version=\"1.0\"?><info><version>1.0</version></info>"));
            bytes.extend(stream_header(1, "Stimulus", "Markers", 1, 0.0, "string", &[]));
            bytes.extend(stream_header(2, "actiCHamp", "EEG", 2, 100.0, "float32", &["Fp1", "EOG1"]));
            bytes.extend(eeg_samples(2, 5.0, &rows[..6]));
            bytes.extend(marker_samples(
                1,
                &[(4.0, "early"), (5.021, "img1/happy"), (5.071, "img2/sad"), (9.0, "late")],
            ));
            bytes.extend(eeg_samples(2, 5.06, &rows[6..]));
            bytes.extend(clock_offset(1, 0.25));
            bytes.extend(clock_offset(1, 0.75));
            bytes.extend(clock_offset(2, 0.5));
            bytes.extend(chunk(6, b"<?xml version=\"1.0\"?><info/>"));
            bytes
        }

        fn write(dir: &Path, bytes: &[u8]) -> std::path::PathBuf {
            let path = dir.join("rec.xdf");
            fs::write(&path, bytes).unwrap();
            path
        }

        #[test]
        fn eeg_stream_with_markers() {
            let dir = tempfile::tempdir().unwrap();
            let raw = load_raw(write(dir.path(), &recording())).unwrap();

            assert_eq!(raw.channels(), ["Fp1", "EOG1"]);
            assert_eq!(raw.sfreq(), 100.0);
            assert_eq!(raw.num_samples(), 10);
            assert_abs_diff_eq!(raw.data()[[0, 7]], 7.0);
            assert_abs_diff_eq!(raw.data()[[1, 3]], -3.0);

            // Markers outside the EEG time range are dropped
            let markers = raw
                .markers()
                .iter()
                .map(|m| (m.kind.as_str(), m.description.as_str(), m.position))
                .collect::<Vec<_>>();
            assert_eq!(markers, [("Stimulus", "img1/happy", 2), ("Stimulus", "img2/sad", 7)]);
        }

        #[test]
        fn timestamps_filled_in_and_synchronized() {
            let dir = tempfile::tempdir().unwrap();
            let streams = load_streams(write(dir.path(), &recording())).unwrap();
            assert_eq!(streams.len(), 2);

            let eeg = &streams[&2];
            assert_eq!(eeg.header.format, ChannelFormat::Float32);
            assert_eq!(eeg.header.labels, ["Fp1", "EOG1"]);
            assert_eq!(eeg.num_samples(), 10);
            assert_abs_diff_eq!(eeg.timestamps[3], 5.53, epsilon = 1e-9);
            assert_abs_diff_eq!(eeg.timestamps[9], 5.59, epsilon = 1e-9);

            let markers = &streams[&1];
            assert_eq!(markers.strings, ["early", "img1/happy", "img2/sad", "late"]);
            // Mean of the two offsets
            assert_abs_diff_eq!(markers.timestamps[1], 5.521, epsilon = 1e-9);
            assert!(markers.values.is_empty());
        }

        #[test]
        fn header_without_channel_labels() {
            let header = StreamHeader::parse(
                "<info><name>amp</name><type>EEG</type><channel_count>3</channel_count>\
                 <nominal_srate>250</nominal_srate><channel_format>int16</channel_format></info>",
            )
            .unwrap();
            assert_eq!(header.channel_count, 3);
            assert_eq!(header.nominal_srate, 250.0);
            assert_eq!(header.format, ChannelFormat::Int16);
            assert!(header.labels.is_empty());

            assert!(StreamHeader::parse(
                "<info><channel_count>1</channel_count><nominal_srate>1</nominal_srate>\
                 <channel_format>complex</channel_format></info>"
            )
            .is_err());
            assert!(StreamHeader::parse("<info><channel_count>").is_err());
        }

        #[test]
        fn malformed_files() {
            let dir = tempfile::tempdir().unwrap();
            let bytes = recording();

            let path = write(dir.path(), &bytes[4..]);
            assert!(matches!(load_raw(&path), Err(Error::Recording { .. })));

            let path = write(dir.path(), &bytes[..bytes.len() - 3]);
            assert!(matches!(load_streams(&path), Err(Error::Recording { .. })));

            // Samples before their stream header
            let mut orphan = b"XDF:".to_vec();
            orphan.extend(eeg_samples(7, 0.0, &[[1.0, 2.0]]));
            let path = write(dir.path(), &orphan);
            assert!(matches!(load_streams(&path), Err(Error::Recording { .. })));

            let mut markers_only = b"XDF:".to_vec();
            markers_only.extend(stream_header(1, "Stimulus", "Markers", 1, 0.0, "string", &[]));
            markers_only.extend(marker_samples(1, &[(1.0, "img1/happy")]));
            let path = write(dir.path(), &markers_only);
            match load_raw(&path) {
                Err(Error::Recording { reason, .. }) => assert_eq!(reason, "no EEG stream"),
                other => panic!("unexpected {:?}", other.map(|r| r.num_samples())),
            }
        }

        #[test]
        fn recording_format_selection() {
            assert_eq!("XDF".parse::<RecordingFormat>().unwrap(), RecordingFormat::Xdf);
            assert_eq!(" brainvision ".parse::<RecordingFormat>().unwrap(), RecordingFormat::BrainVision);
            assert!(matches!("edf".parse::<RecordingFormat>(), Err(Error::Config(_))));

            let bids = BIDSPath::new("/data", "thko03", None, "eeg");
            assert_eq!(
                bids.recording_file("images", Some("1"), RecordingFormat::Xdf),
                Path::new("/data/sub-thko03/eeg/sub-thko03_task-images_run-1_eeg.xdf")
            );
        }
    }

    mod raw {
        use ndarray::array;

        use crate::raw::{eeg_channel_indices, Marker, Raw};

        fn marker(description: &str, position: usize) -> Marker {
            Marker {
                kind: "Stimulus".to_string(),
                description: description.to_string(),
                position,
            }
        }

        fn names(names: &[&str]) -> Vec<String> {
            names.iter().map(|s| s.to_string()).collect()
        }

        #[test]
        fn concatenate_offsets_markers() {
            let a = Raw::new(array![[1.0, 2.0, 3.0]], names(&["Cz"]), 100.0, vec![marker("a/x", 1)]).unwrap();
            let b = Raw::new(array![[4.0, 5.0]], names(&["Cz"]), 100.0, vec![marker("b/y", 0)]).unwrap();
            let merged = a.concatenate(&[b]).unwrap();

            assert_eq!(merged.data(), &array![[1.0, 2.0, 3.0, 4.0, 5.0]]);
            let positions = merged.markers().iter().map(|m| m.position).collect::<Vec<usize>>();
            assert_eq!(positions, vec![1, 3]);
        }

        #[test]
        fn concatenate_rejects_other_channels() {
            let a = Raw::new(array![[1.0]], names(&["Cz"]), 100.0, vec![]).unwrap();
            let b = Raw::new(array![[1.0]], names(&["Pz"]), 100.0, vec![]).unwrap();
            assert!(a.concatenate(&[b]).is_err());
        }

        #[test]
        fn pick_channels_in_order() {
            let raw = Raw::new(array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]], names(&["Fp1", "Fp2", "EOG1"]), 100.0, vec![])
                .unwrap();
            let picked = raw.pick_channels(&names(&["EOG1", "Fp1"])).unwrap();
            assert_eq!(picked.channels(), &names(&["EOG1", "Fp1"])[..]);
            assert_eq!(picked.data(), &array![[3.0, 3.0], [1.0, 1.0]]);

            assert_eq!(raw.pick_channels(&[]).unwrap().channels().len(), 3);
            assert!(raw.pick_channels(&names(&["Oz"])).is_err());
        }

        #[test]
        fn eog_channels_identified() {
            let channels = names(&["Fp1", "EOG_left", "Cz", "EOG_right"]);
            assert_eq!(eeg_channel_indices(&channels, "EOG"), vec![0, 2]);
        }
    }

    mod epochs {
        use approx::assert_abs_diff_eq;
        use ndarray::Array2;

        use crate::config::RecordingInfo;
        use crate::epochs::{segment, split_label};
        use crate::error::Error;
        use crate::raw::{Marker, Raw};

        fn ramp(markers: &[(&str, &str, usize)]) -> Raw {
            let data = Array2::from_shape_fn((1, 30), |(_, t)| t as f32);
            let markers = markers
                .iter()
                .map(|&(kind, description, position)| Marker {
                    kind: kind.to_string(),
                    description: description.to_string(),
                    position,
                })
                .collect();
            Raw::new(data, vec!["Cz".to_string()], 10.0, markers).unwrap()
        }

        fn window() -> RecordingInfo {
            RecordingInfo {
                t_min: -0.2,
                t_max: 0.3,
                ..Default::default()
            }
        }

        #[test]
        fn labels_split_at_first_slash() {
            assert_eq!(split_label("img1/happy"), Some(("img1", "happy")));
            assert_eq!(split_label("img1/a/b"), Some(("img1", "a/b")));
            assert_eq!(split_label("img1"), None);
        }

        #[test]
        fn baseline_corrected_windows() {
            let raw = ramp(&[
                ("New Segment", "", 0),
                ("Stimulus", "img1/happy", 5),
                ("Stimulus", "img2/sad", 25),
            ]);
            let epochs = segment(&raw, &window()).unwrap();

            assert_eq!(epochs.len(), 2);
            assert_eq!(epochs.labels, vec!["img1/happy", "img2/sad"]);
            assert_eq!(epochs.data[0].dim(), (1, 6));
            let expected = [-0.5, 0.5, 1.5, 2.5, 3.5, 4.5];
            for (v, e) in epochs.data[0].iter().zip(expected.iter()) {
                assert_abs_diff_eq!(v, e, epsilon = 1e-5);
            }
        }

        #[test]
        fn windows_outside_recording_skipped() {
            let raw = ramp(&[("Stimulus", "img1/a", 1), ("Stimulus", "img2/a", 10), ("Stimulus", "img3/a", 29)]);
            let epochs = segment(&raw, &window()).unwrap();
            assert_eq!(epochs.labels, vec!["img2/a"]);
        }

        #[test]
        fn without_baseline() {
            let raw = ramp(&[("Stimulus", "img1/a", 10)]);
            let info = RecordingInfo {
                baseline: false,
                ..window()
            };
            let epochs = segment(&raw, &info).unwrap();
            assert_abs_diff_eq!(epochs.data[0][[0, 0]], 8.0, epsilon = 1e-6);
        }

        #[test]
        fn malformed_description() {
            let raw = ramp(&[("Stimulus", "img1", 10)]);
            assert!(matches!(segment(&raw, &window()), Err(Error::InvalidMarker(_))));
        }

        #[test]
        fn evoked_per_condition() {
            let raw = ramp(&[("Stimulus", "img1/a", 10), ("Stimulus", "img2/a", 12), ("Stimulus", "img3/b", 20)]);
            let info = RecordingInfo {
                baseline: false,
                ..window()
            };
            let epochs = segment(&raw, &info).unwrap();
            assert_eq!(epochs.conditions(), vec!["a", "b"]);

            let evoked = epochs.evoked();
            assert_abs_diff_eq!(evoked["a"][[0, 0]], 9.0, epsilon = 1e-6);
            assert_abs_diff_eq!(evoked["b"][[0, 0]], 18.0, epsilon = 1e-6);
        }
    }

    mod artifacts {
        use ndarray::Array2;

        use crate::artifacts;
        use crate::epochs::Epochs;
        use crate::error::Error;

        fn epochs() -> Epochs {
            Epochs {
                data: (0..3)
                    .map(|e| Array2::from_shape_fn((2, 5), |(c, t)| (e * 100 + c * 10 + t) as f32))
                    .collect(),
                labels: vec!["img1/a".into(), "img2/b".into(), "img3/a".into()],
                channels: vec!["Fp1".into(), "EOG1".into()],
                sfreq: 250.0,
                t_min: -0.2,
            }
        }

        #[test]
        fn save_then_load() {
            let dir = tempfile::tempdir().unwrap();
            let original = epochs();
            artifacts::save(dir.path(), "aaaa01", &original).unwrap();

            let loaded = artifacts::load(dir.path(), "aaaa01").unwrap();
            assert_eq!(loaded.data, original.data);
            assert_eq!(loaded.labels, original.labels);
            assert_eq!(loaded.info.channels, original.channels);
            assert_eq!(loaded.info.sfreq, 250.0);
        }

        #[test]
        fn missing_subject() {
            let dir = tempfile::tempdir().unwrap();
            assert!(matches!(
                artifacts::load(dir.path(), "nobody"),
                Err(Error::ArtifactMissing(_))
            ));
        }

        #[test]
        fn label_count_mismatch() {
            let dir = tempfile::tempdir().unwrap();
            artifacts::save(dir.path(), "aaaa01", &epochs()).unwrap();
            std::fs::write(artifacts::labels_path(dir.path(), "aaaa01"), r#"["img1/a"]"#).unwrap();
            assert!(matches!(
                artifacts::load(dir.path(), "aaaa01"),
                Err(Error::Artifact { .. })
            ));
        }

        #[test]
        fn truncated_tensor() {
            let dir = tempfile::tempdir().unwrap();
            artifacts::save(dir.path(), "aaaa01", &epochs()).unwrap();
            let path = artifacts::data_path(dir.path(), "aaaa01");
            let mut bytes = std::fs::read(&path).unwrap();
            bytes.truncate(bytes.len() - 4);
            std::fs::write(&path, bytes).unwrap();
            assert!(matches!(
                artifacts::load(dir.path(), "aaaa01"),
                Err(Error::Artifact { .. })
            ));
        }

        fn write_data_file(dir: &std::path::Path, header_len: u64, header: &[u8], payload: &[u8]) {
            let mut bytes = header_len.to_le_bytes().to_vec();
            bytes.extend_from_slice(header);
            bytes.extend_from_slice(payload);
            std::fs::write(artifacts::data_path(dir, "aaaa01"), bytes).unwrap();
        }

        #[test]
        fn header_length_past_end_of_file() {
            let dir = tempfile::tempdir().unwrap();
            write_data_file(dir.path(), u64::MAX, br#"{"dtype":"F32","shape":[1,1,1]}"#, &[0; 4]);
            assert!(matches!(
                artifacts::load(dir.path(), "aaaa01"),
                Err(Error::Artifact { .. })
            ));

            write_data_file(dir.path(), u64::MAX - 4, b"{}", &[]);
            assert!(matches!(
                artifacts::load(dir.path(), "aaaa01"),
                Err(Error::Artifact { .. })
            ));
        }

        #[test]
        fn shape_with_overflowing_size() {
            let dir = tempfile::tempdir().unwrap();
            let header = br#"{"dtype":"F32","shape":[4294967296,4294967296,16]}"#;
            write_data_file(dir.path(), header.len() as u64, header, &[0; 16]);
            match artifacts::load(dir.path(), "aaaa01") {
                Err(Error::Artifact { reason, .. }) => assert!(reason.contains("overflows"), "{}", reason),
                other => panic!("expected an artifact error, got {:?}", other.map(|a| a.data.len())),
            }

            // Fits in usize, but not once multiplied by the element size
            let header = format!(r#"{{"dtype":"F32","shape":[{},2,1]}}"#, usize::MAX / 4);
            write_data_file(dir.path(), header.len() as u64, header.as_bytes(), &[0; 16]);
            assert!(matches!(
                artifacts::load(dir.path(), "aaaa01"),
                Err(Error::Artifact { .. })
            ));
        }
    }

    mod dataset {
        use std::path::Path;

        use approx::assert_abs_diff_eq;
        use ndarray::Array2;

        use crate::artifacts;
        use crate::config::ExperimentConfig;
        use crate::dataset::assemble;
        use crate::epochs::Epochs;
        use crate::error::Error;
        use crate::survey::{FormTable, RatingsTable};

        const FORM: &str = ",code,gender,age,education,field,q1,q2,q3,q4,q5
0,aaaa01,M,25,BSc,CS,10,20,30,40,0
1,bbbb02,F,31,MSc,Bio,40,40,0,20,10
2,krki20,M,40,PhD,CS,0,0,0,0,0
";
        const RATINGS: &str = "code,img_name,valence,arousal
aaaa01,img1,0.8,0.9
aaaa01,img2,0.05,0.02
bbbb02,img1,-1,0.5
krki20,img1,0,0
";

        fn write_subject(dir: &Path, code: &str, images: &[&str]) {
            let epochs = Epochs {
                data: images
                    .iter()
                    .enumerate()
                    .map(|(e, _)| Array2::from_shape_fn((3, 8), |(c, t)| (e + 1) as f32 * (c * 8 + t) as f32))
                    .collect(),
                labels: images.iter().map(|i| format!("{}/cond", i)).collect(),
                channels: vec!["Fp1".into(), "Fp2".into(), "EOG1".into()],
                sfreq: 100.0,
                t_min: 0.0,
            };
            artifacts::save(dir, code, &epochs).unwrap();
        }

        fn tables() -> (FormTable, RatingsTable) {
            (
                FormTable::from_reader(csv::Reader::from_reader(FORM.as_bytes()), "form").unwrap(),
                RatingsTable::from_reader(csv::Reader::from_reader(RATINGS.as_bytes()), "ratings").unwrap(),
            )
        }

        #[test]
        fn assembled_and_aligned() {
            let dir = tempfile::tempdir().unwrap();
            write_subject(dir.path(), "aaaa01", &["img1", "img2"]);
            write_subject(dir.path(), "bbbb02", &["img1"]);
            // krki20 has no artifacts; the default denylist must keep it out
            let cfg = ExperimentConfig {
                artifacts_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            let (form, ratings) = tables();

            let mut dataset = assemble(&form, &ratings, &cfg).unwrap();
            assert_eq!(dataset.len(), 3);
            assert!(dataset.is_aligned());
            assert_eq!(dataset.subjects, vec!["aaaa01", "aaaa01", "bbbb02"]);
            assert_eq!(dataset.epoch_shape().unwrap(), (3, 8));

            for signal in &dataset.signals {
                let n = signal.len() as f32;
                let mean = signal.sum() / n;
                let std = (signal.mapv(|v| (v - mean).powi(2)).sum() / n).sqrt();
                assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-5);
                assert_abs_diff_eq!(std, 1.0, epsilon = 1e-4);
            }

            let targets = dataset.targets(0.4);
            assert_eq!(targets.row(0).to_vec(), vec![1.0, 1.0, 0.0]);
            assert_eq!(targets.row(1).to_vec(), vec![0.0, 0.0, 1.0]);
            assert_eq!(targets.row(2).to_vec(), vec![0.0, 1.0, 0.0]);

            dataset.encode_features(&cfg).unwrap();
            let info = dataset.info.to_array().unwrap();
            assert_eq!(info.dim(), (3, 9));
            // gender: F -> 0, M -> 1
            assert_eq!(info.column(0).to_vec(), vec![1.0, 1.0, 0.0]);
            assert_abs_diff_eq!(info[[2, 4]], 1.0, epsilon = 1e-12);

            let tensor = dataset.signal_tensor(&[2, 0]).unwrap();
            assert_eq!(tensor.dim(), (2, 3, 8));
            assert_eq!(dataset.signal_tensor(&[]).unwrap().dim(), (0, 3, 8));
        }

        #[test]
        fn eog_rows_dropped_on_request() {
            let dir = tempfile::tempdir().unwrap();
            write_subject(dir.path(), "aaaa01", &["img1"]);
            write_subject(dir.path(), "bbbb02", &["img1"]);
            let cfg = ExperimentConfig {
                artifacts_dir: dir.path().to_path_buf(),
                drop_eog_channels: true,
                ..Default::default()
            };
            let (form, ratings) = tables();
            let dataset = assemble(&form, &ratings, &cfg).unwrap();
            assert_eq!(dataset.epoch_shape().unwrap(), (2, 8));

            // The configured marker is the only one consulted
            let cfg = ExperimentConfig {
                eog_marker: "Fp".to_string(),
                ..cfg
            };
            let dataset = assemble(&form, &ratings, &cfg).unwrap();
            assert_eq!(dataset.epoch_shape().unwrap(), (1, 8));
        }

        #[test]
        fn unrated_image() {
            let dir = tempfile::tempdir().unwrap();
            write_subject(dir.path(), "aaaa01", &["img1", "img9"]);
            write_subject(dir.path(), "bbbb02", &["img1"]);
            let cfg = ExperimentConfig {
                artifacts_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            let (form, ratings) = tables();
            assert!(matches!(
                assemble(&form, &ratings, &cfg),
                Err(Error::NoMatchingRating { ref image, .. }) if image == "img9"
            ));
        }

        #[test]
        fn missing_artifacts_fail() {
            let dir = tempfile::tempdir().unwrap();
            write_subject(dir.path(), "aaaa01", &["img1"]);
            let cfg = ExperimentConfig {
                artifacts_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            let (form, ratings) = tables();
            assert!(matches!(
                assemble(&form, &ratings, &cfg),
                Err(Error::ArtifactMissing(_))
            ));
        }

        #[test]
        fn everyone_excluded() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = ExperimentConfig {
                artifacts_dir: dir.path().to_path_buf(),
                excluded_codes: vec!["aaaa01".into(), "bbbb02".into(), "krki20".into()],
                ..Default::default()
            };
            let (form, ratings) = tables();
            assert!(matches!(assemble(&form, &ratings, &cfg), Err(Error::EmptyDataset)));
        }
    }

    mod model {
        use approx::assert_abs_diff_eq;
        use burn::module::Module;
        use burn::tensor::{Tensor, TensorData};
        use ndarray::Array3;
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        use crate::error::Error;
        use crate::model::{cross_entropy, max_norm, to_array, InferenceBackend, ModelConfig, NUM_OUTPUTS};

        type B = InferenceBackend;

        fn small() -> ModelConfig {
            ModelConfig::new()
                .with_temporal_filters(2)
                .with_depth_multiplier(2)
                .with_separable_filters(4)
                .with_kernel_length(4)
                .with_separable_kernel_length(3)
                .with_pool_length(2)
                .with_separable_pool_length(2)
                .with_dropout(0.0)
        }

        #[test]
        fn probabilities_sum_to_one() {
            let device = Default::default();
            let model = small().init::<B>(2, 8, &device).unwrap();
            let mut rng = StdRng::seed_from_u64(1);
            let x = Array3::from_shape_simple_fn((4, 2, 8), || rng.gen_range(-1.0..1.0));

            let p = model.predict(&x, &device).unwrap();
            assert_eq!(p.dim(), (4, NUM_OUTPUTS));
            for row in p.rows() {
                assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
                assert!(row.iter().all(|&v| v > 0.0));
            }
            assert_eq!(
                model.predict(&Array3::zeros((0, 2, 8)), &device).unwrap().dim(),
                (0, NUM_OUTPUTS)
            );
        }

        #[test]
        fn rejects_wrong_shape() {
            let device = Default::default();
            let model = small().init::<B>(2, 8, &device).unwrap();
            assert!(matches!(
                model.predict(&Array3::zeros((1, 3, 8)), &device),
                Err(Error::Shape(_))
            ));
            // 8 samples pooled by 2, then by 8, leave nothing to classify
            assert!(matches!(
                small().with_separable_pool_length(8).init::<B>(2, 8, &device),
                Err(Error::Shape(_))
            ));
            assert!(matches!(
                small().with_dropout(1.0).init::<B>(2, 8, &device),
                Err(Error::Config(_))
            ));
            assert!(matches!(
                small().with_kernel_length(0).init::<B>(2, 8, &device),
                Err(Error::Config(_))
            ));
        }

        #[test]
        fn layer_sizes() {
            let config = small();
            // 4 separable maps over 8 / 2 / 2 samples
            assert_eq!(config.flattened_features(8), 8);
            assert_eq!(ModelConfig::new().flattened_features(256), 16 * 8);

            let summary = config.summary(2, 8);
            assert!(summary.last().unwrap().ends_with("params 27"), "{:?}", summary);

            let model = config.init::<B>(2, 8, &Default::default()).unwrap();
            assert_eq!(model.input_shape(), (2, 8));
            // Convolutions 8 + 8 + 12 + 16, dense 27, batch norm scales and shifts 20
            assert!(model.num_params() >= 91);
        }

        #[test]
        fn cross_entropy_of_unnormalized_target() {
            let device = Default::default();
            let p = Tensor::<B, 2>::from_data(
                TensorData::new(vec![0.5f32, 0.25, 0.25, 0.5, 0.25, 0.25], [2, 3]),
                &device,
            );
            let y = Tensor::<B, 2>::from_data(
                TensorData::new(vec![1.0f32, 1.0, 0.0, 0.0, 0.0, 0.0], [2, 3]),
                &device,
            );
            // The all-zero target contributes nothing to the mean
            let expected = -(0.5f32.ln() + 0.25f32.ln()) / 2.0;
            assert_abs_diff_eq!(cross_entropy(p, y).into_scalar(), expected, epsilon = 1e-6);
        }

        #[test]
        fn max_norm_rescales_long_columns() {
            let device = Default::default();
            let w = Tensor::<B, 2>::from_data(TensorData::new(vec![3.0f32, 0.0, 4.0, 0.5], [2, 2]), &device);
            let limited = to_array(max_norm(w, 0, 2.0)).unwrap();
            // Column norms 5 and 0.5: the first is brought down to 2, the second kept
            assert_abs_diff_eq!(limited[[0, 0]], 1.2, epsilon = 1e-5);
            assert_abs_diff_eq!(limited[[1, 0]], 1.6, epsilon = 1e-5);
            assert_abs_diff_eq!(limited[[0, 1]], 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(limited[[1, 1]], 0.5, epsilon = 1e-5);
        }
    }

    mod train {
        use burn::module::AutodiffModule;
        use burn::optim::AdamConfig;
        use ndarray::{array, s, Array2, Array3};
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        use crate::error::Error;
        use crate::model::{EEGNet, ModelConfig, TrainingBackend};
        use crate::train::{categorical_hit, evaluate, fit, TrainingConfig};

        type B = TrainingBackend;

        fn data(rng: &mut StdRng, n: usize) -> (Array3<f32>, Array2<f32>) {
            let x = Array3::from_shape_simple_fn((n, 2, 8), || rng.gen_range(-1.0..1.0));
            let y = Array2::from_shape_fn((n, 3), |(i, j)| if i % 3 == j { 1.0 } else { 0.0 });
            (x, y)
        }

        fn config(batch_size: usize, num_epochs: usize) -> TrainingConfig {
            let model = ModelConfig::new()
                .with_temporal_filters(2)
                .with_depth_multiplier(1)
                .with_separable_filters(2)
                .with_kernel_length(3)
                .with_separable_kernel_length(3)
                .with_pool_length(2)
                .with_separable_pool_length(2)
                .with_dropout(0.0)
                .with_depthwise_max_norm(10.0)
                .with_dense_max_norm(10.0);
            TrainingConfig::new(model, AdamConfig::new().with_epsilon(1e-7))
                .with_batch_size(batch_size)
                .with_num_epochs(num_epochs)
        }

        fn model(cfg: &TrainingConfig) -> EEGNet<B> {
            cfg.model.init::<B>(2, 8, &Default::default()).unwrap()
        }

        #[test]
        fn argmax_hits() {
            assert!(categorical_hit(array![0.1, 0.7, 0.2].view(), array![0.0, 1.0, 0.0].view()));
            assert!(!categorical_hit(array![0.6, 0.3, 0.1].view(), array![0.0, 0.0, 1.0].view()));
            // Ties resolve to the first index
            assert!(categorical_hit(array![0.5, 0.2, 0.3].view(), array![1.0, 1.0, 0.0].view()));
        }

        #[test]
        fn history_per_epoch() {
            let mut rng = StdRng::seed_from_u64(5);
            let (x, y) = data(&mut rng, 10);
            let (x_val, y_val) = data(&mut rng, 4);
            let cfg = config(4, 3);
            let device = Default::default();

            let (net, history) =
                fit(model(&cfg), &x, &y, Some((&x_val, &y_val)), &cfg, &device, &mut rng).unwrap();
            assert_eq!(history.loss.len(), 3);
            assert_eq!(history.val_accuracy.len(), 3);
            assert!(history.loss.iter().all(|l| l.is_finite() && *l > 0.0));
            assert!(history.accuracy.iter().all(|a| (0.0..=1.0).contains(a)));

            let (loss, accuracy) = evaluate(&net.valid(), &x_val, &y_val, &device).unwrap();
            assert_eq!(loss, history.val_loss[2]);
            assert_eq!(accuracy, history.val_accuracy[2]);
        }

        #[test]
        fn loss_decreases_on_memorizable_set() {
            let mut rng = StdRng::seed_from_u64(11);
            let (x, y) = data(&mut rng, 6);
            let cfg = config(6, 60);

            let (_, history) = fit(model(&cfg), &x, &y, None, &cfg, &Default::default(), &mut rng).unwrap();
            assert!(history.val_loss.is_empty());
            let (first, last) = (history.loss[0], history.loss[59]);
            assert!(last < first, "loss {} -> {}", first, last);
        }

        #[test]
        fn mismatched_or_empty_input() {
            let mut rng = StdRng::seed_from_u64(5);
            let (x, y) = data(&mut rng, 4);
            let cfg = config(16, 1);
            let device = Default::default();

            assert!(matches!(
                fit(model(&cfg), &x, &y.slice(s![..3, ..]).to_owned(), None, &cfg, &device, &mut rng),
                Err(Error::Shape(_))
            ));
            let wide = Array3::zeros((4, 3, 8));
            assert!(matches!(
                fit(model(&cfg), &wide, &y, None, &cfg, &device, &mut rng),
                Err(Error::Shape(_))
            ));
            let empty_x = Array3::zeros((0, 2, 8));
            let empty_y = Array2::zeros((0, 3));
            assert!(matches!(
                fit(model(&cfg), &empty_x, &empty_y, None, &cfg, &device, &mut rng),
                Err(Error::EmptyDataset)
            ));
        }
    }

    mod metrics {
        use approx::assert_abs_diff_eq;
        use ndarray::array;

        use crate::metrics::{binarize, flattened_roc, macro_precision_recall_fscore, roc_curve, score, subset_accuracy};

        #[test]
        fn binarize_is_strict() {
            let p = array![[0.5f32, 0.51, 0.1]];
            assert_eq!(binarize(&p, 0.5), array![[0.0, 1.0, 0.0]]);
        }

        #[test]
        fn exact_match_accuracy() {
            let y = array![[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0, 0.0]];
            let p = array![[1.0f32, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
            assert_abs_diff_eq!(subset_accuracy(y.view(), p.view()).unwrap(), 0.5, epsilon = 1e-12);

            let (precision, recall, fscore) = macro_precision_recall_fscore(y.view(), p.view()).unwrap();
            assert_abs_diff_eq!(precision, 2.0 / 3.0, epsilon = 1e-12);
            assert_abs_diff_eq!(recall, 2.0 / 3.0, epsilon = 1e-12);
            assert_abs_diff_eq!(fscore, 2.0 / 3.0, epsilon = 1e-12);

            let scores = score(&y, &p).unwrap();
            assert_abs_diff_eq!(scores.accuracy, 0.5, epsilon = 1e-12);
        }

        #[test]
        fn partial_column_scores() {
            // tp = 1, fp = 1, fn = 1 in the only column
            let y = array![[1.0f32], [1.0], [0.0]];
            let p = array![[1.0f32], [0.0], [1.0]];
            let (precision, recall, fscore) = macro_precision_recall_fscore(y.view(), p.view()).unwrap();
            assert_abs_diff_eq!(precision, 0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(recall, 0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(fscore, 0.5, epsilon = 1e-12);
        }

        #[test]
        fn roc_and_auc() {
            let roc = roc_curve(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.4, 0.35, 0.8]).unwrap();
            assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
            assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
            assert!(roc.thresholds[0].is_infinite());
            assert_abs_diff_eq!(roc.auc(), 0.75, epsilon = 1e-12);
        }

        #[test]
        fn collinear_points_dropped() {
            let roc = roc_curve(&[1.0, 1.0, 0.0, 0.0], &[0.9, 0.8, 0.3, 0.2]).unwrap();
            assert_eq!(roc.fpr, vec![0.0, 0.0, 0.0, 1.0]);
            assert_eq!(roc.tpr, vec![0.0, 0.5, 1.0, 1.0]);
            assert_eq!(&roc.thresholds[1..], &[0.9f32 as f64, 0.8f32 as f64, 0.2f32 as f64]);
            assert_abs_diff_eq!(roc.auc(), 1.0, epsilon = 1e-12);

            // Three positives in a row: the middle step is on the segment
            let roc = roc_curve(&[1.0, 1.0, 1.0, 0.0], &[0.8, 0.7, 0.6, 0.5]).unwrap();
            assert_eq!(roc.tpr, vec![0.0, 1.0 / 3.0, 1.0, 1.0]);
            assert_eq!(roc.fpr, vec![0.0, 0.0, 0.0, 1.0]);
        }

        #[test]
        fn flattened_binary_scores() {
            let y = array![[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0]];
            let roc = flattened_roc(&y, &y).unwrap();
            // Two distinct scores: (0, 0) -> (0, 1) -> (1, 1)
            assert_eq!(roc.fpr, vec![0.0, 0.0, 1.0]);
            assert_eq!(roc.tpr, vec![0.0, 1.0, 1.0]);
            assert_abs_diff_eq!(roc.auc(), 1.0, epsilon = 1e-12);
        }

        #[test]
        fn shape_mismatch() {
            let y = array![[1.0f32, 0.0, 0.0]];
            let p = array![[1.0f32, 0.0]];
            assert!(score(&y, &p).is_err());
            assert!(roc_curve(&[1.0], &[]).is_err());
        }
    }
}
