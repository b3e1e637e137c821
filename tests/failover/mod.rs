mod standby_takeover;
