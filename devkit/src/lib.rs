/*!
# Pulsewatch DevKit - Stubs et utilitaires pour les tests

Bibliothèque facilitant l'écriture de tests Pulsewatch avec:
- Stub MQTT pour tester publishers et consommateurs sans broker
- Builders de payloads heartbeat (valides ou volontairement cassés)
- Harness de test avec attentes sur les messages publiés
- Broker TCP minimal rejouant des messages retenus
*/

pub mod broker_stub;
pub mod mqtt_stub;
pub mod test_utils;

pub use broker_stub::FakeBroker;
pub use mqtt_stub::{HeartbeatPayloads, MockMessage, MockMqttClient};
pub use test_utils::{init_test_tracing, TestHarness};
