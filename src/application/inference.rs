//! Inference service: Orchestrates CBC anemia inference.
//!
//! This service coordinates:
//! - Lazy model bundle loading
//! - Table preparation (reconciliation, coercion, filtering)
//! - Per-row scoring and score validation
//! - Report generation
//! - Optional persistence of analyses
//!
//! The two upload use cases never return `Err`; every failure becomes a
//! labelled [`AnalysisOutcome`] a caller can render as-is.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::adapters::tabular::{read_csv, table_from_json_record};
use crate::adapters::{BundleLoader, SqliteStorage};
use crate::config::Settings;
use crate::domain::{
    prepare_table, AnalysisSource, AnemiaClass, CbcAnalysis, CbcRecord, ClassProbabilities,
    ConflictPolicy, FeatureAliasTable, LabTable, PipelineError, PredictionOutput,
    PredictionResult, PreparedBatch, UsedFeatureSet,
};
use crate::ports::{ModelBundle, Score, ScorerError, Storage};

use super::model::LazyModel;

/// Provenance attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadContext {
    pub patient_id: Option<String>,
    pub uploaded_by: Option<String>,
    pub notes: String,
    /// Attach the rendered clinical report to each result
    pub include_reports: bool,
}

impl Default for UploadContext {
    fn default() -> Self {
        Self {
            patient_id: None,
            uploaded_by: None,
            notes: String::new(),
            include_reports: true,
        }
    }
}

/// A CSV file as received from an upload form.
#[derive(Debug, Clone, Default)]
pub struct CsvUpload {
    pub filename: Option<String>,
    pub contents: Vec<u8>,
    pub context: UploadContext,
}

/// Lab values typed into a form.
#[derive(Debug, Clone, Default)]
pub struct ManualEntry {
    pub record: CbcRecord,
    pub context: UploadContext,
}

/// Labelled result of an upload use case.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub message: String,
    pub results: Vec<PredictionOutput>,
    /// IDs of persisted analyses, in result order
    pub analysis_ids: Vec<String>,
    /// Set when inference succeeded but saving failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
}

impl AnalysisOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Service for running CBC inference.
pub struct CbcInferenceService<S: Storage = SqliteStorage> {
    model: Arc<LazyModel>,
    aliases: Arc<FeatureAliasTable>,
    policy: ConflictPolicy,
    storage: Option<Arc<S>>,
}

impl CbcInferenceService {
    /// Create a service without persistence.
    #[must_use]
    pub fn new(model: LazyModel) -> Self {
        Self {
            model: Arc::new(model),
            aliases: Arc::new(FeatureAliasTable::default()),
            policy: ConflictPolicy::default(),
            storage: None,
        }
    }

    /// Build the service described by `settings`.
    ///
    /// The model is not loaded here; call [`initialize`](Self::initialize).
    ///
    /// # Errors
    /// Returns error if the configured database cannot be opened.
    pub fn from_settings(settings: &Settings) -> crate::Result<Self> {
        let loader =
            BundleLoader::new(&settings.model_dir).require_manifest(settings.require_manifest);
        let service =
            Self::new(LazyModel::from_loader(loader)).with_conflict_policy(settings.alias_conflicts);

        match &settings.db_path {
            Some(path) => {
                tracing::info!("Persisting analyses to {:?}", path);
                Ok(service.with_storage(Arc::new(SqliteStorage::new(path)?)))
            }
            None => Ok(service),
        }
    }
}

impl<S: Storage> CbcInferenceService<S> {
    /// Attach a storage collaborator.
    #[must_use]
    pub fn with_storage<T: Storage>(self, storage: Arc<T>) -> CbcInferenceService<T> {
        CbcInferenceService {
            model: self.model,
            aliases: self.aliases,
            policy: self.policy,
            storage: Some(storage),
        }
    }

    /// Replace the column alias table.
    #[must_use]
    pub fn with_aliases(mut self, aliases: FeatureAliasTable) -> Self {
        self.aliases = Arc::new(aliases);
        self
    }

    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load the model bundle now instead of on first request.
    ///
    /// # Errors
    /// Returns `PipelineError::ModelUnavailable` if the bundle cannot be loaded.
    pub fn initialize(&self) -> Result<(), PipelineError> {
        tracing::info!("Initializing CBC inference service...");
        let bundle = self.model.get()?;
        tracing::info!(
            "CBC inference service ready ({} feature(s): {})",
            bundle.used_features.len(),
            bundle
                .used_features
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.model.is_loaded()
    }

    #[must_use]
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Features the model was trained on, in model order.
    ///
    /// # Errors
    /// Returns `PipelineError::ModelUnavailable` if the bundle cannot be loaded.
    pub fn required_features(&self) -> Result<UsedFeatureSet, PipelineError> {
        Ok(self.model.get()?.used_features.clone())
    }

    /// Reconcile, coerce and filter a raw table against the model's features.
    ///
    /// # Errors
    /// Column-level validation errors, or `ModelUnavailable`.
    pub fn prepare(&self, table: &LabTable) -> Result<PreparedBatch, PipelineError> {
        let bundle = self.model.get()?;
        prepare_table(table, &self.aliases, &bundle.used_features, self.policy)
    }

    /// Score every valid row of a table.
    ///
    /// Results follow input order; `row_index` counts scored rows from 0.
    /// Rows whose values overflow the scaler or the scorer are dropped like
    /// rows with missing values. Any other scorer failure fails the whole
    /// batch.
    ///
    /// # Errors
    /// Validation errors from preparation, `ModelUnavailable`, or `Inference`.
    pub fn predict_table(&self, table: &LabTable) -> Result<Vec<PredictionResult>, PipelineError> {
        let bundle = self.model.get()?;
        let batch = prepare_table(table, &self.aliases, &bundle.used_features, self.policy)?;
        let total_rows = batch.len() + batch.dropped_rows;

        tracing::debug!(
            "Scoring {} row(s) ({} dropped)",
            batch.len(),
            batch.dropped_rows
        );

        let mut results = Vec::with_capacity(batch.len());
        for record in batch.records {
            if let Some(result) = score_record(&bundle, results.len(), record)? {
                results.push(result);
            }
        }

        if results.is_empty() {
            return Err(PipelineError::EmptyResult { total_rows });
        }
        Ok(results)
    }

    /// Score a single record.
    ///
    /// Runs through the same preparation and scoring as a batch row, so the
    /// result is identical to scoring the record inside any batch.
    ///
    /// # Errors
    /// `EmptyResult` if a required value is missing, `ModelUnavailable`, or
    /// `Inference`.
    pub fn predict_record(&self, record: &CbcRecord) -> Result<PredictionResult, PipelineError> {
        self.predict_single(&LabTable::from_records(std::slice::from_ref(record)))
    }

    /// Score a single JSON object of label → value, with alias reconciliation.
    ///
    /// # Errors
    /// Same as [`predict_record`](Self::predict_record), plus `MissingColumns`.
    pub fn predict_fields(&self, fields: &Map<String, Value>) -> Result<PredictionResult, PipelineError> {
        self.predict_single(&table_from_json_record(fields))
    }

    fn predict_single(&self, table: &LabTable) -> Result<PredictionResult, PipelineError> {
        self.predict_table(table)?
            .into_iter()
            .next()
            .ok_or(PipelineError::EmptyResult { total_rows: 1 })
    }

    /// Analyze an uploaded CSV file.
    #[must_use]
    pub fn process_csv_upload(&self, upload: CsvUpload) -> AnalysisOutcome {
        let Some(filename) = upload.filename.as_deref().filter(|f| !f.trim().is_empty()) else {
            return AnalysisOutcome::failure(
                "No file was selected. Please select a CSV file to upload.",
            );
        };
        if !filename.to_lowercase().ends_with(".csv") {
            return AnalysisOutcome::failure(
                "Invalid file type. Please upload a CSV file (.csv extension).",
            );
        }
        if upload.contents.is_empty() {
            return AnalysisOutcome::failure(
                "The uploaded file is empty. Please upload a valid CSV file with CBC data.",
            );
        }

        let table = match read_csv(&upload.contents) {
            Ok(table) => table,
            Err(e) => return AnalysisOutcome::failure(format!("CSV validation error: {e}")),
        };
        if table.is_empty() {
            return AnalysisOutcome::failure(
                "The CSV file contains no data. Please ensure your file has CBC test results.",
            );
        }

        match self.predict_table(&table) {
            Ok(results) => {
                let message = format!(
                    "CBC analysis completed successfully! Analyzed {} sample(s).",
                    results.len()
                );
                self.complete(results, AnalysisSource::Csv, upload.context, message)
            }
            Err(PipelineError::EmptyResult { total_rows }) => {
                tracing::debug!("No valid rows in {} uploaded row(s)", total_rows);
                AnalysisOutcome::failure(
                    "No valid data rows found in CSV. Please check your file format and values.",
                )
            }
            Err(e) if e.is_validation() => {
                AnalysisOutcome::failure(format!("CSV validation error: {e}"))
            }
            Err(e) => {
                tracing::error!("CSV analysis failed: {}", e);
                AnalysisOutcome::failure(format!("Error processing CSV: {e}"))
            }
        }
    }

    /// Analyze one set of manually entered values.
    #[must_use]
    pub fn process_manual_input(&self, entry: ManualEntry) -> AnalysisOutcome {
        match self.predict_record(&entry.record) {
            Ok(result) => self.complete(
                vec![result],
                AnalysisSource::Manual,
                entry.context,
                "CBC analysis completed successfully!".to_string(),
            ),
            Err(PipelineError::EmptyResult { .. }) => {
                AnalysisOutcome::failure("Invalid CBC values provided. Please check your input.")
            }
            Err(e) if e.is_validation() => {
                AnalysisOutcome::failure(format!("Validation error: {e}"))
            }
            Err(e) => {
                tracing::error!("Manual analysis failed: {}", e);
                AnalysisOutcome::failure(format!("Error during CBC analysis: {e}"))
            }
        }
    }

    /// Most recent stored analyses, newest first. Empty without storage.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn recent_analyses(&self, limit: usize) -> Result<Vec<CbcAnalysis>, S::Error> {
        match &self.storage {
            Some(storage) => storage.load_recent_analyses(limit),
            None => Ok(Vec::new()),
        }
    }

    /// Stored analyses for one patient, newest first. Empty without storage.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn patient_analyses(&self, patient_id: &str) -> Result<Vec<CbcAnalysis>, S::Error> {
        match &self.storage {
            Some(storage) => storage.load_patient_analyses(patient_id),
            None => Ok(Vec::new()),
        }
    }

    fn complete(
        &self,
        results: Vec<PredictionResult>,
        source: AnalysisSource,
        context: UploadContext,
        message: String,
    ) -> AnalysisOutcome {
        let outputs: Vec<PredictionOutput> = results
            .iter()
            .map(|r| r.to_output(context.include_reports))
            .collect();
        let (analysis_ids, persistence_error) = self.persist(&results, &outputs, source, &context);

        let anemic = results
            .iter()
            .filter(|r| r.predicted_class == AnemiaClass::Anemia)
            .count();
        tracing::info!(
            "Analysis complete ({}): {} sample(s), {} anemic, {} persisted",
            source,
            results.len(),
            anemic,
            analysis_ids.len()
        );

        AnalysisOutcome {
            success: true,
            message,
            results: outputs,
            analysis_ids,
            persistence_error,
            notes: context.notes,
            patient_id: context.patient_id,
            uploaded_by: context.uploaded_by,
        }
    }

    /// Save one analysis per result; stops at the first failure.
    fn persist(
        &self,
        results: &[PredictionResult],
        outputs: &[PredictionOutput],
        source: AnalysisSource,
        context: &UploadContext,
    ) -> (Vec<String>, Option<String>) {
        let Some(storage) = &self.storage else {
            return (Vec::new(), None);
        };

        let mut ids = Vec::with_capacity(results.len());
        for (result, output) in results.iter().zip(outputs) {
            let analysis = CbcAnalysis::from_prediction(result, source)
                .with_patient(context.patient_id.as_deref())
                .with_uploader(context.uploaded_by.as_deref())
                .with_report(output.report.clone())
                .with_notes(context.notes.as_str());

            if let Err(e) = storage.save_analysis(&analysis) {
                tracing::warn!("Failed to save analysis: {}", e);
                return (ids, Some(format!("Failed to save analysis: {e}")));
            }
            ids.push(analysis.id);
        }
        (ids, None)
    }
}

/// Scale, score and validate one prepared record.
///
/// `Ok(None)` when the values are finite but too large for the model to
/// produce a finite score.
fn score_record(
    bundle: &ModelBundle,
    row_index: usize,
    record: CbcRecord,
) -> Result<Option<PredictionResult>, PipelineError> {
    let features = record.feature_vector(&bundle.used_features).map_err(|missing| {
        PipelineError::Inference(format!(
            "row {row_index} is missing {} value(s) after preparation",
            missing.len()
        ))
    })?;
    let scaled = bundle
        .scaler
        .transform(&features)
        .map_err(PipelineError::Inference)?;
    if scaled.iter().any(|x| !x.is_finite()) {
        tracing::warn!("Dropping row: values overflow the feature scaler");
        return Ok(None);
    }

    let score = match bundle.scorer.score(&scaled) {
        Ok(score) => score,
        Err(ScorerError::NonFinite) => {
            tracing::warn!("Dropping row: scorer cannot produce a finite score");
            return Ok(None);
        }
        Err(e) => return Err(PipelineError::Inference(e.to_string())),
    };

    let probabilities = validate_score(&score)?;
    Ok(Some(PredictionResult::new(
        row_index,
        score.class,
        probabilities,
        record,
    )))
}

/// Probabilities must be finite, in `[0, 1]`, and the reported class must
/// carry at least as much mass as the other one.
fn validate_score(score: &Score) -> Result<ClassProbabilities, PipelineError> {
    let [normal, anemia] = score.probabilities;
    let probabilities = ClassProbabilities::new(normal, anemia);
    if !probabilities.is_valid() {
        return Err(PipelineError::Inference(format!(
            "scorer returned invalid probabilities [{normal}, {anemia}]"
        )));
    }

    let other = match score.class {
        AnemiaClass::Normal => AnemiaClass::Anemia,
        AnemiaClass::Anemia => AnemiaClass::Normal,
    };
    if probabilities.of(score.class) < probabilities.of(other) {
        return Err(PipelineError::Inference(format!(
            "scorer predicted {} with probability {:.4} below {}",
            score.class,
            probabilities.of(score.class),
            other
        )));
    }
    Ok(probabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StorageError;
    use crate::domain::{Feature, StandardScaler};
    use crate::ports::Scorer;

    /// Deterministic stand-in for the classifier: P(anemia) falls with HGB.
    struct StubScorer;

    impl Scorer for StubScorer {
        fn n_features(&self) -> usize {
            8
        }

        fn score(&self, features: &[f64]) -> Result<Score, ScorerError> {
            if features.len() != 8 {
                return Err(ScorerError::Shape {
                    expected: 8,
                    got: features.len(),
                });
            }
            let p1 = 1.0 / (1.0 + (2.0 * features[1]).exp());
            let class = if p1 >= 0.5 {
                AnemiaClass::Anemia
            } else {
                AnemiaClass::Normal
            };
            Ok(Score {
                class,
                probabilities: [1.0 - p1, p1],
            })
        }
    }

    /// Scorer whose class disagrees with its probabilities.
    struct InconsistentScorer;

    impl Scorer for InconsistentScorer {
        fn n_features(&self) -> usize {
            8
        }

        fn score(&self, _features: &[f64]) -> Result<Score, ScorerError> {
            Ok(Score {
                class: AnemiaClass::Anemia,
                probabilities: [0.9, 0.1],
            })
        }
    }

    /// Storage that refuses every write.
    struct ReadOnlyStorage;

    impl Storage for ReadOnlyStorage {
        type Error = StorageError;

        fn save_analysis(&self, _analysis: &CbcAnalysis) -> Result<(), Self::Error> {
            Err(StorageError::Serialization("database is read-only".into()))
        }

        fn load_analysis(&self, _id: &str) -> Result<Option<CbcAnalysis>, Self::Error> {
            Ok(None)
        }

        fn load_recent_analyses(&self, _limit: usize) -> Result<Vec<CbcAnalysis>, Self::Error> {
            Ok(Vec::new())
        }

        fn load_patient_analyses(&self, _patient_id: &str) -> Result<Vec<CbcAnalysis>, Self::Error> {
            Ok(Vec::new())
        }

        fn count_analyses(&self) -> Result<usize, Self::Error> {
            Ok(0)
        }

        fn delete_analysis(&self, id: &str) -> Result<(), Self::Error> {
            Err(StorageError::NotFound(id.to_string()))
        }

        fn clear_all(&self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn stub_bundle(scorer: Arc<dyn Scorer>) -> ModelBundle {
        ModelBundle::new(
            UsedFeatureSet::standard(),
            StandardScaler::new(
                vec![4.6, 12.0, 39.0, 85.0, 28.5, 33.0, 7.5, 260.0],
                vec![0.6, 1.5, 5.5, 7.5, 3.0, 1.5, 2.2, 70.0],
            )
            .expect("Should build scaler"),
            scorer,
        )
        .expect("Should assemble")
    }

    fn create_test_service() -> CbcInferenceService {
        CbcInferenceService::new(LazyModel::ready(stub_bundle(Arc::new(StubScorer))))
    }

    fn csv_upload(contents: &str) -> CsvUpload {
        CsvUpload {
            filename: Some("results.csv".into()),
            contents: contents.as_bytes().to_vec(),
            context: UploadContext {
                patient_id: Some("P-7".into()),
                uploaded_by: Some("dr-lee".into()),
                notes: "fasting sample".into(),
                include_reports: true,
            },
        }
    }

    const CSV: &str = "\
Sample ID,RBC,Hb,HCT,MCV,MCH,MCHC,WBC,Platelets
S1,4.0,9.5,30,72,24,29,6.5,250
S2,4.1,,31,73,24,29,6.5,250
S3,5.0,14.5,44,90,30,34,7.2,280
";

    fn microcytic() -> CbcRecord {
        CbcRecord {
            rbc: Some(4.0),
            hgb: Some(9.5),
            pcv: Some(30.0),
            mcv: Some(72.0),
            mch: Some(24.0),
            mchc: Some(29.0),
            tlc: Some(6.5),
            plt: Some(250.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_initialization() {
        let service = create_test_service();
        service.initialize().expect("Should initialize");
        assert!(service.is_ready());
        assert_eq!(
            service.required_features().expect("Should load").as_slice()[1],
            Feature::Hgb
        );
    }

    #[test]
    fn test_initialize_surfaces_missing_bundle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let service =
            CbcInferenceService::new(LazyModel::from_loader(BundleLoader::new(temp.path())));
        assert!(matches!(
            service.initialize(),
            Err(PipelineError::ModelUnavailable(_))
        ));
        assert!(!service.is_ready());
    }

    #[test]
    fn test_batch_and_single_agree() {
        let service = create_test_service();
        let table = read_csv(CSV.as_bytes()).expect("Should parse");
        let batch = service.predict_table(&table).expect("Should predict");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].row_index, 1);

        for result in &batch {
            let single = service.predict_record(&result.source_row).expect("Should predict");
            assert_eq!(single.predicted_class, result.predicted_class);
            assert_eq!(single.probabilities, result.probabilities);
            assert_eq!(single.confidence, result.confidence);
        }
    }

    #[test]
    fn test_confidence_bounds() {
        let service = create_test_service();
        let table = read_csv(CSV.as_bytes()).expect("Should parse");
        for r in service.predict_table(&table).expect("Should predict") {
            assert!((0.0..=1.0).contains(&r.confidence));
            assert!(r.confidence >= 0.5);
            let sum = r.probabilities.normal + r.probabilities.anemia;
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_alias_invariance() {
        let service = create_test_service();
        let canonical = "RBC,HGB,PCV,MCV,MCH,MCHC,TLC,PLT\n4.0,9.5,30,72,24,29,6.5,250\n";
        let aliased = "rbc,Hemoglobin,hematocrit,mcv,MCH,MCHC,white blood cells,Platelet Count\n4.0,9.5,30,72,24,29,6.5,250\n";

        let a = service
            .predict_table(&read_csv(canonical.as_bytes()).expect("Should parse"))
            .expect("Should predict");
        let b = service
            .predict_table(&read_csv(aliased.as_bytes()).expect("Should parse"))
            .expect("Should predict");
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_fields() {
        let service = create_test_service();
        let fields: Map<String, Value> = serde_json::from_str(
            r#"{"RBC": 4.0, "Hb": "9.5", "HCT": 30, "MCV": 72, "MCH": 24, "MCHC": 29, "WBC": 6.5, "PLT": 250}"#,
        )
        .expect("Should parse");
        let from_fields = service.predict_fields(&fields).expect("Should predict");
        let from_record = service.predict_record(&microcytic()).expect("Should predict");
        assert_eq!(from_fields.probabilities, from_record.probabilities);
        assert_eq!(from_fields.predicted_class, AnemiaClass::Anemia);
    }

    #[test]
    fn test_predict_record_missing_value() {
        let service = create_test_service();
        let mut record = microcytic();
        record.plt = None;
        assert_eq!(
            service.predict_record(&record),
            Err(PipelineError::EmptyResult { total_rows: 1 })
        );
    }

    #[test]
    fn test_overflowing_row_dropped() {
        let service = create_test_service();
        let csv = "\
RBC,HGB,PCV,MCV,MCH,MCHC,TLC,PLT
1.7e308,9.5,30,72,24,29,6.5,250
4.0,9.5,30,72,24,29,6.5,250
";
        let results = service
            .predict_table(&read_csv(csv.as_bytes()).expect("Should parse"))
            .expect("Should predict");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].row_index, 0);
        assert_eq!(results[0].source_row.rbc, Some(4.0));

        let mut record = microcytic();
        record.rbc = Some(1.7e308);
        assert_eq!(
            service.predict_record(&record),
            Err(PipelineError::EmptyResult { total_rows: 1 })
        );
    }

    #[test]
    fn test_custom_alias_table() {
        let csv = "\
erythrocytes,haem,packed cell volume,mcv,mch,mchc,leukocytes,thrombocytes
4.0,9.5,30,72,24,29,6.5,250
";
        let table = read_csv(csv.as_bytes()).expect("Should parse");
        assert!(matches!(
            create_test_service().predict_table(&table),
            Err(PipelineError::MissingColumns(_))
        ));

        let aliases = FeatureAliasTable::new(vec![
            (Feature::Rbc, vec!["erythrocytes".into()]),
            (Feature::Hgb, vec!["haem".into()]),
            (Feature::Pcv, vec!["packed cell volume".into()]),
            (Feature::Mcv, vec!["mcv".into()]),
            (Feature::Mch, vec!["mch".into()]),
            (Feature::Mchc, vec!["mchc".into()]),
            (Feature::Tlc, vec!["leukocytes".into()]),
            (Feature::Plt, vec!["thrombocytes".into()]),
        ]);
        let service = create_test_service().with_aliases(aliases);
        let custom = service.predict_table(&table).expect("Should predict");
        let canonical = create_test_service()
            .predict_record(&microcytic())
            .expect("Should predict");
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].probabilities, canonical.probabilities);
        assert_eq!(custom[0].predicted_class, AnemiaClass::Anemia);
    }

    #[test]
    fn test_inconsistent_scorer_rejected() {
        let service =
            CbcInferenceService::new(LazyModel::ready(stub_bundle(Arc::new(InconsistentScorer))));
        let err = service.predict_record(&microcytic()).expect_err("Should fail");
        assert!(matches!(err, PipelineError::Inference(_)));
    }

    #[test]
    fn test_csv_upload_success_with_storage() {
        let storage = Arc::new(SqliteStorage::in_memory().expect("Should create db"));
        let service = create_test_service();
        assert!(!service.has_storage());
        let service = service.with_storage(Arc::clone(&storage));
        assert!(service.has_storage());

        let outcome = service.process_csv_upload(csv_upload(CSV));
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(
            outcome.message,
            "CBC analysis completed successfully! Analyzed 2 sample(s)."
        );
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].id.as_deref(), Some("S1"));
        assert!(outcome.results[0].report.is_some());
        assert_eq!(outcome.analysis_ids.len(), 2);
        assert!(outcome.persistence_error.is_none());
        assert_eq!(outcome.notes, "fasting sample");
        assert_eq!(outcome.patient_id.as_deref(), Some("P-7"));

        let stored = service.patient_analyses("P-7").expect("Should load");
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.source == AnalysisSource::Csv));
        assert_eq!(service.recent_analyses(1).expect("Should load").len(), 1);
    }

    #[test]
    fn test_csv_upload_labelled_failures() {
        let service = create_test_service();

        let mut upload = csv_upload(CSV);
        upload.filename = None;
        assert_eq!(
            service.process_csv_upload(upload).message,
            "No file was selected. Please select a CSV file to upload."
        );

        let mut upload = csv_upload(CSV);
        upload.filename = Some("results.xlsx".into());
        assert_eq!(
            service.process_csv_upload(upload).message,
            "Invalid file type. Please upload a CSV file (.csv extension)."
        );

        let outcome = service.process_csv_upload(csv_upload(""));
        assert_eq!(
            outcome.message,
            "The uploaded file is empty. Please upload a valid CSV file with CBC data."
        );

        let outcome = service.process_csv_upload(csv_upload("RBC,HGB,PCV\n"));
        assert_eq!(
            outcome.message,
            "The CSV file contains no data. Please ensure your file has CBC test results."
        );

        let outcome = service.process_csv_upload(csv_upload("RBC,HGB\n4.0,9.5\n"));
        assert!(!outcome.success);
        assert!(outcome
            .message
            .starts_with("CSV validation error: Missing required columns: PCV, MCV"));

        let all_invalid = "RBC,HGB,PCV,MCV,MCH,MCHC,TLC,PLT\n4.0,,30,72,24,29,6.5,250\n";
        let outcome = service.process_csv_upload(csv_upload(all_invalid));
        assert_eq!(
            outcome.message,
            "No valid data rows found in CSV. Please check your file format and values."
        );
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_csv_upload_uppercase_extension() {
        let service = create_test_service();
        let mut upload = csv_upload(CSV);
        upload.filename = Some("RESULTS.CSV".into());
        assert!(service.process_csv_upload(upload).success);
    }

    #[test]
    fn test_manual_input() {
        let service = create_test_service();
        let outcome = service.process_manual_input(ManualEntry {
            record: microcytic(),
            context: UploadContext {
                include_reports: false,
                ..UploadContext::default()
            },
        });
        assert!(outcome.success);
        assert_eq!(outcome.message, "CBC analysis completed successfully!");
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].predicted_class, AnemiaClass::Anemia);
        assert!(outcome.results[0].report.is_none());
        assert!(outcome.analysis_ids.is_empty());

        let mut record = microcytic();
        record.hgb = Some(f64::NAN);
        let outcome = service.process_manual_input(ManualEntry {
            record,
            context: UploadContext::default(),
        });
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Invalid CBC values provided. Please check your input."
        );
    }

    #[test]
    fn test_persistence_failure_keeps_results() {
        let service = create_test_service().with_storage(Arc::new(ReadOnlyStorage));
        let outcome = service.process_manual_input(ManualEntry {
            record: microcytic(),
            context: UploadContext::default(),
        });
        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.analysis_ids.is_empty());
        assert!(outcome
            .persistence_error
            .as_deref()
            .is_some_and(|e| e.contains("read-only")));
    }

    #[test]
    fn test_model_unavailable_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let service =
            CbcInferenceService::new(LazyModel::from_loader(BundleLoader::new(temp.path())));
        let outcome = service.process_manual_input(ManualEntry {
            record: microcytic(),
            context: UploadContext::default(),
        });
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Error during CBC analysis: Model unavailable"));
    }

    #[test]
    fn test_conflict_policy_reject_outcome() {
        let service = create_test_service().with_conflict_policy(ConflictPolicy::Reject);
        let csv = "RBC,HGB,Hb,PCV,MCV,MCH,MCHC,TLC,PLT\n4.0,9.5,9.4,30,72,24,29,6.5,250\n";
        let outcome = service.process_csv_upload(csv_upload(csv));
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("CSV validation error: Ambiguous columns"));
    }
}
